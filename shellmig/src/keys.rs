/// Salt folded into every advisory lock id.
pub const ADVISORY_LOCK_ID_SALT: u32 = 1486364155;

/// Derives the advisory lock id for a `(database, schema)` target.
///
/// The id is reproducible across processes so independent drivers aimed at the
/// same target always compete for the same lock.
pub fn advisory_lock_id(database_name: &str, schema_name: &str) -> u32 {
    let mut name = Vec::with_capacity(schema_name.len() + database_name.len() + 1);
    name.extend_from_slice(schema_name.as_bytes());
    name.push(0);
    name.extend_from_slice(database_name.as_bytes());
    crc32(&name).wrapping_mul(ADVISORY_LOCK_ID_SALT)
}

/// CRC-32 (IEEE 802.3, reflected) checksum.
fn crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB88320;
    let mut crc: u32 = 0xFFFFFFFF;

    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }

    crc ^ 0xFFFFFFFF
}

/// Quotes a PostgreSQL identifier.
///
/// Anything after an embedded NUL is discarded; PostgreSQL cannot store it.
pub fn quote_identifier(name: &str) -> String {
    let name = name.split('\0').next().unwrap_or_default();
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Key-construction helpers for the Redis backend.
#[derive(Debug, Clone)]
pub struct KeyContext<'a> {
    pub namespace: &'a str,
}

impl<'a> KeyContext<'a> {
    /// Prefix for lock keys; kept outside every namespace so a drop never removes a held lock.
    pub const LOCK_PREFIX: &'static str = "shellmig:lock";

    pub fn new(namespace: &'a str) -> Self {
        Self { namespace }
    }

    pub fn version_item(&self, table: &str) -> String {
        format!("{}:{}", self.namespace, table)
    }

    /// SCAN pattern covering every key in the namespace.
    pub fn namespace_pattern(&self) -> String {
        format!("{}:*", self.namespace)
    }

    pub fn lock(&self, lock_id: u32) -> String {
        format!("{}:{}", Self::LOCK_PREFIX, lock_id)
    }

    /// List a releasing holder pushes to wake blocked contenders.
    pub fn lock_signal(&self, lock_id: u32) -> String {
        format!("{}:{}:signal", Self::LOCK_PREFIX, lock_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_reference_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn advisory_lock_id_is_stable() {
        assert_eq!(advisory_lock_id("postgres", "public"), 2898930719);
        assert_eq!(advisory_lock_id("app", "migrate"), 99205429);
        assert_eq!(advisory_lock_id("", ""), 4055619647);
    }

    #[test]
    fn advisory_lock_id_depends_on_both_names() {
        assert_ne!(advisory_lock_id("db", "a"), advisory_lock_id("db", "b"));
        assert_ne!(advisory_lock_id("a", "db"), advisory_lock_id("db", "a"));
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_identifier("schema_migrations"), "\"schema_migrations\"");
        assert_eq!(quote_identifier("odd\"name"), "\"odd\"\"name\"");
        assert_eq!(quote_identifier("cut\0here"), "\"cut\"");
    }

    #[test]
    fn builds_redis_keys() {
        let ctx = KeyContext::new("migrate");
        assert_eq!(ctx.version_item("schema_migrations"), "migrate:schema_migrations");
        assert_eq!(ctx.namespace_pattern(), "migrate:*");
        assert_eq!(ctx.lock(7), "shellmig:lock:7");
        assert_eq!(ctx.lock_signal(7), "shellmig:lock:7:signal");
    }
}
