/// Lua script for sliding window rate limiting over a timestamp log
///
/// The sorted set holds one member per admitted event, scored by its
/// millisecond timestamp. Redis runs the script as a single unit, so the
/// purge, count and insert cannot interleave with another caller.
///
/// KEYS[1] = the rate limit key
/// ARGV[1] = maximum operations
/// ARGV[2] = window duration (milliseconds)
/// ARGV[3] = current timestamp (milliseconds)
/// ARGV[4] = unique member for this event
///
/// Returns: [allowed (0/1), remaining operations, retry_after (milliseconds)]
pub const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local max_operations = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local member = ARGV[4]

-- Events at or before the window start no longer count
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)

local current_count = redis.call('ZCARD', key)

if current_count < max_operations then
    redis.call('ZADD', key, now, member)
    redis.call('PEXPIRE', key, window)
    return {1, max_operations - current_count - 1, 0}
end

-- Time until the oldest counted event leaves the window
local retry_after = window
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
    retry_after = math.max(0, tonumber(oldest[2]) + window - now)
end
redis.call('PEXPIRE', key, window)

return {0, 0, retry_after}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_uses_atomic_sorted_set_ops() {
        assert!(SLIDING_WINDOW_SCRIPT.contains("ZREMRANGEBYSCORE"));
        assert!(SLIDING_WINDOW_SCRIPT.contains("ZCARD"));
        assert!(SLIDING_WINDOW_SCRIPT.contains("ZADD"));
        assert!(SLIDING_WINDOW_SCRIPT.contains("PEXPIRE"));
    }
}
