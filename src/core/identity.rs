//! Identity capability shared by users and rooms

/// Anything that can be addressed on the wire by id and shown by name:
/// authenticated users, anonymous users, persisted rooms and live rooms.
pub trait Identifiable {
    fn id(&self) -> &str;
    fn display_name(&self) -> &str;
}
