pub mod codes {
    pub const CONFIGURATION: &str = "GD100";
    pub const INTEGRITY: &str = "GD200";
    pub const DOWNLOAD: &str = "GD300";
    pub const DECOMPRESSION: &str = "GD400";
    pub const STATE: &str = "GD500";
    pub const CANCELLED: &str = "GD600";
}
