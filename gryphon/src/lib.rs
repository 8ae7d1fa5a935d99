mod server;

pub use server::{resolve_rank, spawn_gc, Server, ServerArgs};
