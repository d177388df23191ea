//! API request handlers

pub mod certificates;

pub use certificates::{
    bulk_certificates, cancel_certificates, check_status, create_certificate,
    download_certificate, get_certificate, search_certificates, suspend_certificates, AppState,
    SearchQuery,
};
