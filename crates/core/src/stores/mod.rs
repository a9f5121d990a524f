pub mod local;

pub use local::LocalVectorStore;
