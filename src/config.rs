/// Connection details for the remote object store, grounded in the
/// teacher's `S3Config`: an S3-compatible endpoint plus the key prefix this
/// engine's key layout is rooted under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Optional root prefix; the server directory is nested under it
    /// (`{prefix}/{server_name}/...`).
    pub prefix: String,
}

/// Engine-wide configuration: which server's catalog to operate on, the
/// minimum-redundancy floor, and the batch size used for batched deletes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub server_name: String,
    pub store: StoreConfig,
    /// Floor below which a single-backup deletion is refused
    /// (Invariant 5). Zero disables the floor.
    pub minimum_redundancy: u32,
    /// Maximum number of keys per batched delete request. `None` lets the
    /// store's own default apply; the engine never splits a batch itself.
    pub delete_batch_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            store: StoreConfig {
                endpoint: String::new(),
                region: String::new(),
                bucket: String::new(),
                access_key: String::new(),
                secret_key: String::new(),
                prefix: String::new(),
            },
            minimum_redundancy: 0,
            delete_batch_size: None,
        }
    }
}
