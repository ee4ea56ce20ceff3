pub mod url_validation;
pub use url_validation::{
    UrlValidationError, validate_http_url, validate_ice_server_url, validate_socket_url,
};
