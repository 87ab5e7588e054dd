use {
	super::Error,
	parking_lot::RwLock,
	serde::{Deserialize, Serialize},
	sha2::{Digest, Sha256},
	std::{collections::BTreeMap, time::SystemTime},
};

/// A keyed leaf of the tree: the stored value plus its digest and the
/// instant it was last written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Leaf {
	pub key: String,
	pub value: Vec<u8>,
	pub modified: SystemTime,
	pub hash: String,
}

impl Leaf {
	fn new(key: String, value: Vec<u8>, modified: SystemTime) -> Self {
		let hash = hash_bytes(&value);
		Self {
			key,
			value,
			modified,
			hash,
		}
	}
}

/// One element of a computed diff. A missing value marks a deletion when
/// the item is applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataItem {
	pub key: String,
	pub value: Option<Vec<u8>>,
	pub modified: SystemTime,
}

/// Tree shape and size, for the monitoring collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
	pub total_leaves: usize,
	pub root_hash: String,
	pub max_depth: usize,
}

/// A Merkle tree over a keyed data set, for efficient replica diffing.
///
/// Notes:
///
/// - The root hash is a pure function of the set of `(key, value)` pairs:
///   leaves are kept sorted by key, so insertion order never shows.
///
/// - Construction respects `max_depth`: past that depth all remaining
///   siblings collapse into a single node hashing their concatenation.
///
/// - All mutations rebuild the derived tree under the write lock; reads
///   under the read lock observe a consistent leaf set and root.
pub struct MerkleTree {
	max_depth: usize,
	state: RwLock<State>,
}

struct State {
	leaves: BTreeMap<String, Leaf>,
	/// Derived root digest; the empty sentinel when the tree is empty.
	root_hash: String,
}

impl MerkleTree {
	pub fn new(max_depth: usize) -> Self {
		Self {
			max_depth,
			state: RwLock::new(State {
				leaves: BTreeMap::new(),
				root_hash: String::new(),
			}),
		}
	}

	/// Upserts a leaf and rebuilds the tree.
	pub fn add(&self, key: impl Into<String>, value: Vec<u8>) {
		let key = key.into();
		let mut state = self.state.write();
		state
			.leaves
			.insert(key.clone(), Leaf::new(key, value, SystemTime::now()));
		state.rebuild(self.max_depth);
	}

	/// Replaces an existing leaf's value; fails if the key is absent.
	pub fn update(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
		let mut state = self.state.write();
		if !state.leaves.contains_key(key) {
			return Err(Error::NotFound(key.to_owned()));
		}

		state
			.leaves
			.insert(key.to_owned(), Leaf::new(key.to_owned(), value, SystemTime::now()));
		state.rebuild(self.max_depth);
		Ok(())
	}

	/// Removes a leaf; fails if the key is absent.
	pub fn delete(&self, key: &str) -> Result<(), Error> {
		let mut state = self.state.write();
		if state.leaves.remove(key).is_none() {
			return Err(Error::NotFound(key.to_owned()));
		}

		state.rebuild(self.max_depth);
		Ok(())
	}

	pub fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
		self
			.state
			.read()
			.leaves
			.get(key)
			.map(|leaf| leaf.value.clone())
			.ok_or_else(|| Error::NotFound(key.to_owned()))
	}

	/// The root hash, or the empty sentinel for an empty tree.
	pub fn root_hash(&self) -> String {
		self.state.read().root_hash.clone()
	}

	/// Snapshot of the leaf set.
	pub fn leaves(&self) -> BTreeMap<String, Leaf> {
		self.state.read().leaves.clone()
	}

	pub fn stats(&self) -> Stats {
		let state = self.state.read();
		Stats {
			total_leaves: state.leaves.len(),
			root_hash: state.root_hash.clone(),
			max_depth: self.max_depth,
		}
	}

	/// Computes the symmetric difference against another replica's leaves.
	///
	/// Returns an empty set when the root hashes already match. Keys
	/// present locally but missing or differing on the other side carry
	/// the local value; keys only the other side has carry its value.
	/// Conflict resolution is the caller's problem.
	pub fn diff(
		&self,
		other_root_hash: &str,
		other_leaves: &BTreeMap<String, Leaf>,
	) -> Vec<DataItem> {
		let state = self.state.read();

		if state.root_hash == other_root_hash {
			return Vec::new();
		}

		let mut diff = Vec::new();

		for (key, leaf) in &state.leaves {
			let differs = other_leaves
				.get(key)
				.is_none_or(|other| other.hash != leaf.hash);
			if differs {
				diff.push(DataItem {
					key: key.clone(),
					value: Some(leaf.value.clone()),
					modified: leaf.modified,
				});
			}
		}

		for (key, leaf) in other_leaves {
			if !state.leaves.contains_key(key) {
				diff.push(DataItem {
					key: key.clone(),
					value: Some(leaf.value.clone()),
					modified: leaf.modified,
				});
			}
		}

		diff
	}

	/// Applies a diff: items with a value upsert, items without one
	/// delete. Last write wins by item order; the tree is rebuilt once.
	pub fn apply_diff(&self, diff: Vec<DataItem>) {
		let mut state = self.state.write();

		for item in diff {
			match item.value {
				Some(value) => {
					state.leaves.insert(
						item.key.clone(),
						Leaf::new(item.key, value, item.modified),
					);
				}
				None => {
					state.leaves.remove(&item.key);
				}
			}
		}

		state.rebuild(self.max_depth);
	}
}

impl State {
	fn rebuild(&mut self, max_depth: usize) {
		if self.leaves.is_empty() {
			self.root_hash = String::new();
			return;
		}

		// BTreeMap iteration is already key-ascending, which is what keeps
		// the root independent of insertion order.
		let level = self
			.leaves
			.values()
			.map(|leaf| leaf.hash.clone())
			.collect();

		self.root_hash = build_level(level, 0, max_depth);
	}
}

/// Pairs sibling digests into parents, level by level. An odd trailing
/// digest is promoted unchanged; once `max_depth` is reached the whole
/// level collapses into one digest of the concatenation.
fn build_level(mut nodes: Vec<String>, depth: usize, max_depth: usize) -> String {
	if nodes.len() == 1 {
		return nodes.remove(0);
	}

	if depth >= max_depth {
		return hash_bytes(nodes.concat().as_bytes());
	}

	let mut parents = Vec::with_capacity(nodes.len() / 2 + 1);
	let mut nodes = nodes.into_iter();

	while let Some(left) = nodes.next() {
		match nodes.next() {
			Some(right) => {
				parents.push(hash_bytes(format!("{left}{right}").as_bytes()));
			}
			None => parents.push(left),
		}
	}

	build_level(parents, depth + 1, max_depth)
}

fn hash_bytes(data: &[u8]) -> String {
	hex::encode(Sha256::digest(data))
}
