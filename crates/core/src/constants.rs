/// Events buffered before a flush is forced
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Milliseconds after the first unflushed append before a flush is forced
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 60_000;

/// Maximum length of the serialized clicked-URL list on a message record
pub const CLICKED_URLS_MAX_LEN: usize = 255;

/// Separator used when serializing the clicked-URL list
pub const CLICKED_URLS_SEPARATOR: char = ';';
