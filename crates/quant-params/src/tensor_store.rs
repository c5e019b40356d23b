//! Constant tensor storage for exported parameters
//!
//! Lifted parameters, buffers and module attributes are stored once and looked up by
//! the name of the graph node that refers to them.

use std::collections::HashMap;

use burn_tensor::TensorData;

/// Unique identifier for tensor data in the store
pub type TensorId = usize;

/// Central storage for parameter data with unique ID assignment
#[derive(Debug, Clone, Default)]
pub struct TensorStore {
    /// Maps tensor IDs to their data
    data: HashMap<TensorId, TensorData>,
    /// Maps node names to tensor IDs
    names: HashMap<String, TensorId>,
    /// Next available tensor ID
    next_id: TensorId,
}

impl TensorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store data under a node name, replacing any previous entry for that name
    ///
    /// Returns the allocated ID
    pub fn insert(&mut self, name: impl Into<String>, data: TensorData) -> TensorId {
        let id = self.next_id;
        self.next_id += 1;
        self.data.insert(id, data);
        if let Some(previous) = self.names.insert(name.into(), id) {
            self.data.remove(&previous);
        }
        id
    }

    pub fn get(&self, id: TensorId) -> Option<&TensorData> {
        self.data.get(&id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&TensorData> {
        self.names.get(name).and_then(|id| self.data.get(id))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_and_id() {
        let mut store = TensorStore::new();
        let id = store.insert("scale", TensorData::new(vec![0.5f32, 0.25], [2]));

        assert_eq!(store.get(id).unwrap().shape, vec![2]);
        assert_eq!(
            store.get_by_name("scale").unwrap().as_slice::<f32>().unwrap(),
            &[0.5, 0.25]
        );
        assert!(store.contains("scale"));
        assert!(store.get_by_name("zp").is_none());
    }

    #[test]
    fn test_reinsert_replaces_previous_data() {
        let mut store = TensorStore::new();
        let first = store.insert("w", TensorData::new(vec![1.0f32], [1]));
        let second = store.insert("w", TensorData::new(vec![2.0f32, 3.0], [2]));

        assert_ne!(first, second);
        assert!(store.get(first).is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_by_name("w").unwrap().shape, vec![2]);
    }
}
