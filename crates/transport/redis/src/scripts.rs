//! Lua scripts executed atomically on the server.

/// `KEYS[1]`: key. `ARGV[1]`: `1` if a current value is expected, `0` if the
/// key must be absent. `ARGV[2]`: expected value. `ARGV[3]`: new value.
///
/// Returns `1` when the value was written, `0` otherwise.
pub(crate) const COMPARE_AND_SET: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current ~= ARGV[2] then
        return 0
    end
elseif current then
    return 0
end
redis.call('SET', KEYS[1], ARGV[3])
return 1
";
