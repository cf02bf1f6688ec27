use hashbrown::HashMap;

use crate::types::ScoreId;

/// Foreign key to score ids, in score creation order.
pub type VecIndex<K> = HashMap<K, Vec<ScoreId>>;

pub(crate) fn remove_from_vec_index<K: std::hash::Hash + Eq>(index: &mut VecIndex<K>, key: &K, id: ScoreId) {
    if let Some(ids) = index.get_mut(key) {
        if let Some(pos) = ids.iter().position(|x| *x == id) {
            ids.remove(pos);
        }
        if ids.is_empty() {
            index.remove(key);
        }
    }
}
