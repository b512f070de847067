//! Keyspace layout.
//!
//! ```text
//! name|link:{name}:owner         -> claimed-at timestamp, permanent
//! name|link:{name}:hold          -> credential digest, TTL
//! name|link:{name}:pin           -> PIN digest, TTL while held, permanent once claimed
//! name|link:{name}:lapses        -> integer
//! name|link:{name}:reserved_at   -> RFC 3339 timestamp of first reservation
//! name|link:{name}:security_q    -> string
//! name|link:{name}:security_a    -> answer digest
//! name|link:{name}:invited_by    -> referrer name
//! name|link:{name}:invite_count  -> integer
//! links:all                      -> ordered set, score = reservation time (ms)
//! links:count                    -> integer
//! ```

use crate::policy::Name;

const NAME_PREFIX: &str = "name|link:";

pub const ALL_NAMES: &str = "links:all";
pub const NAME_COUNT: &str = "links:count";

fn field(name: &Name, field: &str) -> String {
    format!("{}{}:{}", NAME_PREFIX, name.as_str(), field)
}

pub fn owner(name: &Name) -> String {
    field(name, "owner")
}

pub fn hold(name: &Name) -> String {
    field(name, "hold")
}

pub fn pin(name: &Name) -> String {
    field(name, "pin")
}

pub fn lapses(name: &Name) -> String {
    field(name, "lapses")
}

pub fn reserved_at(name: &Name) -> String {
    field(name, "reserved_at")
}

pub fn security_question(name: &Name) -> String {
    field(name, "security_q")
}

pub fn security_answer(name: &Name) -> String {
    field(name, "security_a")
}

pub fn invited_by(name: &Name) -> String {
    field(name, "invited_by")
}

pub fn invite_count(name: &Name) -> String {
    field(name, "invite_count")
}
