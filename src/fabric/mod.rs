mod merkle;
mod message;

pub use {
	merkle::{DataItem, Leaf, MerkleTree, Stats},
	message::{SyncRequest, SyncResponse},
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
	#[error("key {0:?} not found")]
	NotFound(String),
}
