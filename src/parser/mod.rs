pub mod file_name;
pub mod url_resolver;

pub use file_name::derive_file_name;
pub use url_resolver::{ResolvedUrls, UrlResolver};
