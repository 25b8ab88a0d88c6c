pub mod time;

/// Generate a collision-resistant id for sessions, edges and queue records.
pub fn longid() -> String {
    nanoid::nanoid!()
}
