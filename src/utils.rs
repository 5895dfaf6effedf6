use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};

const CACHE_DIR_NAME: &str = "gridpoint_cache";
const SNAPSHOT_FILE_NAME: &str = "gridpoint_cache.bin";
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub fn get_cache_dir() -> io::Result<PathBuf> {
    dirs::cache_dir()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "Could not determine system cache directory",
            )
        })
        .map(|p| p.join(CACHE_DIR_NAME))
}

/// Default location of the store snapshot inside the user cache directory.
pub fn default_snapshot_path() -> io::Result<PathBuf> {
    get_cache_dir().map(|dir| dir.join(SNAPSHOT_FILE_NAME))
}

pub async fn ensure_cache_dir_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("Cache path exists but is not a directory: {}", path.display()),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::info!("Creating cache directory: {}", path.display());
            tokio::fs::create_dir_all(path).await
        }
        Err(e) => Err(e),
    }
}

/// Formats a timestamp the way `If-Modified-Since` expects it.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use gridpoint_cache::format_http_date;
///
/// let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
/// assert_eq!(format_http_date(ts), "Tue, 05 Mar 2024 14:07:09 GMT");
/// ```
pub fn format_http_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format(HTTP_DATE_FORMAT).to_string()
}

/// Parses a `Last-Modified` style header value. Returns `None` for anything
/// that is not a valid RFC 2822 date.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
