//! Inputs and their derivation from solver models.
//!
//! An [`Input`] is one node of the exploration tree: the byte blobs
//! fed to the target, the number of path predicates fixed by ancestor
//! inversions, and the predicted branch vector for its own traced
//! run.  Inputs live in an arena ([`InputStore`]); parents are
//! referenced by stable [`InputId`] and are never freed during a run,
//! so divergence and crash reports can always reach them.

use crate::buffer::FileBuffer;

/// Stable arena index of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct InputId(pub u32);

/// One node of the exploration tree.
#[derive(Debug, Clone)]
pub struct Input {
    /// One blob per target file, or one per captured socket message.
    /// Count and order are identical across all inputs of one run.
    pub blobs: Vec<FileBuffer>,
    /// Path-condition predicates fixed by ancestor inversions.
    pub start_depth: u32,
    /// Predicted branch outcomes for this input's traced run; length
    /// equals `start_depth` for every derived input.
    pub prediction: Vec<bool>,
    /// Arena id of the parent; `None` for the root.
    pub parent: Option<InputId>,
}

impl Input {
    /// The root input: blobs as given, no prediction.
    pub fn root(blobs: Vec<FileBuffer>, start_depth: u32) -> Self {
        Self {
            blobs,
            start_depth,
            prediction: Vec::new(),
            parent: None,
        }
    }
}

/// Arena of all inputs created during a run.
#[derive(Default)]
pub struct InputStore {
    records: Vec<Input>,
}

impl InputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, input: Input) -> InputId {
        let id = InputId(self.records.len() as u32);
        self.records.push(input);
        id
    }

    pub fn get(&self, id: InputId) -> &Input {
        &self.records[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: InputId) -> &mut Input {
        &mut self.records[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Build the child input for an inverted branch.
///
/// Clones the parent's blobs and rewrites them from the solver model
/// (blob `k` owns the `file_<k>_*` symbols).  Returns `None` — prune
/// the branch — when any blob reports that the model does not touch
/// it, or when the observed branch vector is too short to predict
/// from.
///
/// The child predicts the parent's observed branches up to the
/// inverted conjunct, and the negation at the conjunct itself:
/// `prediction.len() == start_depth == parent.start_depth + index + 1`.
pub fn derive_child(
    parent_id: InputId,
    parent: &Input,
    model: &str,
    query_index: u32,
    actual: &[bool],
) -> Option<Input> {
    let depth = parent.start_depth as usize + query_index as usize + 1;
    if actual.len() < depth {
        log::warn!(
            "branch vector too short ({} < {depth}); dropping query {query_index}",
            actual.len()
        );
        return None;
    }

    let mut blobs = Vec::with_capacity(parent.blobs.len());
    for (k, blob) in parent.blobs.iter().enumerate() {
        blobs.push(blob.apply_model(model, k)?);
    }

    let mut prediction = actual[..depth].to_vec();
    prediction[depth - 1] = !actual[depth - 1];

    Some(Input {
        blobs,
        start_depth: depth as u32,
        prediction,
        parent: Some(parent_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_with(data: &[u8]) -> Input {
        Input::root(vec![FileBuffer::new("input.bin", data.to_vec())], 1)
    }

    #[test]
    fn store_hands_out_sequential_ids() {
        let mut store = InputStore::new();
        let a = store.insert(root_with(b"a"));
        let b = store.insert(root_with(b"b"));
        assert_eq!(a, InputId(0));
        assert_eq!(b, InputId(1));
        assert_eq!(store.get(a).blobs[0].data(), b"a");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn derive_applies_model_and_links_parent() {
        let mut store = InputStore::new();
        let root = root_with(b"hello");
        let root_id = store.insert(root.clone());

        let model = "ASSERT( file_0_0 = 0h00 );\n";
        let child = derive_child(root_id, &root, model, 0, &[true]).unwrap();

        assert_eq!(child.blobs[0].data(), b"\x00ello");
        assert_eq!(child.parent, Some(root_id));
    }

    #[test]
    fn derive_sets_depth_and_prediction() {
        let root = root_with(b"abcd");
        let actual = [true, true, false, true, false];
        // Invert the third conjunct after the root's single fixed one.
        let child = derive_child(
            InputId(0),
            &root,
            "ASSERT( file_0_1 = 0hFF );\n",
            2,
            &actual,
        )
        .unwrap();

        assert_eq!(child.start_depth, root.start_depth + 2 + 1);
        assert_eq!(child.prediction.len() as u32, child.start_depth);
        // Prefix copied from the observed vector, last element negated.
        assert_eq!(child.prediction[..3], actual[..3]);
        assert_eq!(child.prediction[3], !actual[3]);
    }

    #[test]
    fn derive_prunes_untouched_blob() {
        let root = Input::root(
            vec![
                FileBuffer::new("a", b"xx".to_vec()),
                FileBuffer::new("b", b"yy".to_vec()),
            ],
            1,
        );
        // The model only constrains blob 0; blob 1 reports no change.
        let model = "ASSERT( file_0_0 = 0h41 );\n";
        assert!(derive_child(InputId(0), &root, model, 0, &[true, true]).is_none());

        let model = "ASSERT( file_0_0 = 0h41 );\nASSERT( file_1_1 = 0h42 );\n";
        let child = derive_child(InputId(0), &root, model, 0, &[true, true]).unwrap();
        assert_eq!(child.blobs[0].data(), b"Ax");
        assert_eq!(child.blobs[1].data(), b"yB");
    }

    #[test]
    fn derive_prunes_short_branch_vector() {
        let root = root_with(b"zz");
        let model = "ASSERT( file_0_0 = 0h00 );\n";
        // Needs start_depth + index + 1 = 3 observed branches.
        assert!(derive_child(InputId(0), &root, model, 1, &[true, false]).is_none());
        assert!(derive_child(InputId(0), &root, model, 1, &[true, false, true]).is_some());
    }

    #[test]
    fn derived_depths_follow_query_index() {
        let root = root_with(b"q");
        let actual = vec![false; 8];
        let model = "ASSERT( file_0_0 = 0h01 );\n";
        for index in 0..4u32 {
            let child = derive_child(InputId(0), &root, model, index, &actual).unwrap();
            assert_eq!(child.start_depth, root.start_depth + index + 1);
            assert_eq!(child.prediction.len() as u32, child.start_depth);
        }
    }
}
