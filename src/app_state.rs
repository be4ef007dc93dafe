use std::time::Instant;

use crate::fetch::Fetcher;

#[derive(Clone)]
pub struct AppState {
    pub fetcher: Fetcher,
    /// Content type reported for decrypted media. No sniffing is performed,
    /// so this is a configured default rather than a detected value.
    pub decrypt_content_type: String,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(fetcher: Fetcher, decrypt_content_type: String) -> Self {
        Self {
            fetcher,
            decrypt_content_type,
            started_at: Instant::now(),
        }
    }
}
