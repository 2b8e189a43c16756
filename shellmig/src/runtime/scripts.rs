use redis::Script;
use std::sync::LazyLock;

pub const ACQUIRE_LOCK_SCRIPT_BODY: &str = include_str!("../../lua/acquire_lock.lua");
pub const RELEASE_LOCK_SCRIPT_BODY: &str = include_str!("../../lua/release_lock.lua");
pub const RENEW_LOCK_SCRIPT_BODY: &str = include_str!("../../lua/renew_lock.lua");
pub const SET_VERSION_SCRIPT_BODY: &str = include_str!("../../lua/set_version.lua");

pub static ACQUIRE_LOCK_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(ACQUIRE_LOCK_SCRIPT_BODY));
pub static RELEASE_LOCK_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(RELEASE_LOCK_SCRIPT_BODY));
pub static RENEW_LOCK_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(RENEW_LOCK_SCRIPT_BODY));
pub static SET_VERSION_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(SET_VERSION_SCRIPT_BODY));
