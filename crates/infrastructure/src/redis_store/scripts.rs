//! Master锁的比较后操作脚本，在服务端一次往返内完成，避免读后写的竞争窗口

use redis::Script;

/// KEYS[1]=锁键 ARGV[1]=持有者ID ARGV[2]=TTL秒数，返回1表示刷新成功
const REFRESH_LOCK_LUA: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('EXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// KEYS[1]=锁键 ARGV[1]=持有者ID，返回1表示删除成功
const RELEASE_LOCK_LUA: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

pub fn refresh_lock_script() -> Script {
    Script::new(REFRESH_LOCK_LUA)
}

pub fn release_lock_script() -> Script {
    Script::new(RELEASE_LOCK_LUA)
}
