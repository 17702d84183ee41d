pub mod client;
mod store;
mod tree;

pub use store::FirebaseStore;
