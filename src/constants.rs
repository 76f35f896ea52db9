//! Shared constants used across the application.

/// Default user agent for origin requests.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Subdirectory of a board directory that holds thumbnails.
pub const THUMBNAIL_DIR: &str = "t";

/// Filename prefix reserved for thumbnails.
pub const THUMBNAIL_PREFIX: &str = "thumb_";

/// Filename suffix of every thumbnail.
pub const THUMBNAIL_SUFFIX: &str = ".jpg";

/// Suffix of in-flight download files; never a final storage name.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Bytes read per iteration when hashing files from disk.
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Hex characters of the digest appended to disambiguate colliding names.
pub const DIGEST_TOKEN_LEN: usize = 8;
