pub mod conversation;
pub mod outbox;
pub mod quota;
pub mod tenant;
pub mod timeline;
