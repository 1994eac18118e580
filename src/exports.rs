pub use {
    bio,
    csv,
    log,
    rayon,
    serde,
    serde_json,
    tempfile,
};
