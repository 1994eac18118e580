//! Small helpers shared by the configuration types.

/// Generates a builder-style `with_<field>` method.
#[macro_export]
macro_rules! with_field_fn {
    ($field_name: ident, $field_type: ty) => {
        paste::paste! {
            pub fn [<with_$field_name>](mut self, value: $field_type) -> Self {
                self.$field_name = value;
                self
            }
        }
    };
}
pub use with_field_fn;

/// Appends `.idx` to the full file name of `path`.
pub fn index_path_for(path: &std::path::Path) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".idx");
    std::path::PathBuf::from(name)
}
