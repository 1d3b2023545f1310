/// `AppConfig` holds static configuration values for the application:
/// fixed file names, the external tool name and the limits applied to it.
pub struct AppConfig;

impl AppConfig {
    /// Name of the external downloader executable.
    pub const SCDL_PROGRAM: &'static str = "scdl";
    /// Per-user configuration directory, created under the platform config root.
    pub const CONFIG_DIR_NAME: &'static str = "scdl-sync";
    /// Settings file inside the configuration directory.
    pub const CONFIG_FILE_NAME: &'static str = "config.json";
    /// Playlist mapping file inside the configuration directory.
    pub const MAPPINGS_FILE_NAME: &'static str = "playlists.json";
    /// Cached auto-generated client id inside the configuration directory.
    pub const CLIENT_ID_CACHE_FILE_NAME: &'static str = "client_id_cache.json";
    /// Download archive kept by scdl in every synced directory.
    pub const ARCHIVE_FILE_NAME: &'static str = "scdl_archive.txt";
    /// Archives smaller than this cannot hold a single record and are
    /// treated as corrupted.
    pub const MIN_VALID_ARCHIVE_BYTES: u64 = 10;
    /// Hard upper bound on a single scdl run.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;
    /// Cached client ids older than this are re-generated.
    pub const CLIENT_ID_CACHE_TTL_SECS: i64 = 86_400;
    /// Prefix for environment variable overrides of settings keys.
    pub const ENV_PREFIX: &'static str = "SCDL_SYNC_";
    /// Extensions counted when computing the downloaded-files delta.
    pub const AUDIO_EXTENSIONS: [&'static str; 6] = ["mp3", "wav", "flac", "m4a", "ogg", "opus"];
}
