pub mod delete;
pub mod dequeue;
pub mod meta;
pub mod store;
