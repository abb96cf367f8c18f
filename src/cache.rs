//! Exchange window cache.
//!
//! The engine only reports and accepts values for its current simulation
//! window, while the assimilation framework sees every item as covering the
//! whole model range. Reads are merged into the remembered model-range value;
//! writes are sliced back down to the window before they are sent.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::items::{ItemValue, ItemValues, SeriesError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("item `{id}`: {source}")]
    Series {
        id: String,
        #[source]
        source: SeriesError,
    },

    #[error("item `{id}`: cannot merge a {window} window into a {model} value")]
    TypeMismatch {
        id: String,
        model: &'static str,
        window: &'static str,
    },
}

/// Insert `window` into `model`, overwriting overlap and extending the axis.
///
/// Values that do not vary in time replace the model value outright.
pub fn merge_to_model_range(model: &ItemValue, window: &ItemValue) -> Result<ItemValue, SeriesError> {
    match (model, window) {
        (ItemValue::Series0D(full), ItemValue::Series0D(part)) => {
            full.merge(part).map(ItemValue::Series0D)
        }
        (ItemValue::Series1D(full), ItemValue::Series1D(part)) => {
            full.merge(part).map(ItemValue::Series1D)
        }
        _ => Ok(window.clone()),
    }
}

/// Exact slice `[start, end]` of a model-range value; identity for
/// values that do not vary in time.
pub fn restrict_to_current_range(
    model: &ItemValue,
    start: i64,
    end: i64,
) -> Result<ItemValue, SeriesError> {
    match model {
        ItemValue::Series0D(full) => full.restrict(start, end).map(ItemValue::Series0D),
        ItemValue::Series1D(full) => full.restrict(start, end).map(ItemValue::Series1D),
        other => Ok(other.clone()),
    }
}

/// Model-range values of one instance, keyed by item id.
#[derive(Debug, Default, Clone)]
pub struct WindowCache {
    entries: BTreeMap<String, ItemValue>,
}

impl WindowCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ItemValue> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge freshly read window values; returns the model-range view.
    /// Nothing is remembered unless every value merges.
    pub fn absorb(&mut self, window: ItemValues) -> Result<ItemValues, CacheError> {
        let mut merged = ItemValues::new();
        for (id, value) in window {
            let model = match self.entries.get(&id) {
                Some(known) => {
                    check_kind(&id, known, &value)?;
                    merge_to_model_range(known, &value).map_err(|source| CacheError::Series {
                        id: id.clone(),
                        source,
                    })?
                }
                None => value,
            };
            merged.insert(id, model);
        }
        for (id, model) in &merged {
            self.entries.insert(id.clone(), model.clone());
        }
        Ok(merged)
    }

    /// Remember values supplied by the caller as the new model-range values
    /// and return them sliced to `[start, end]` for sending.
    ///
    /// A caller value that is itself only a window is merged into the known
    /// model range first.
    pub fn stage(
        &mut self,
        values: &ItemValues,
        start: i64,
        end: i64,
    ) -> Result<ItemValues, CacheError> {
        let mut window = ItemValues::new();
        let mut staged = Vec::with_capacity(values.len());
        for (id, value) in values {
            let model = match self.entries.get(id) {
                Some(known) => {
                    check_kind(id, known, value)?;
                    merge_to_model_range(known, value).map_err(|source| CacheError::Series {
                        id: id.clone(),
                        source,
                    })?
                }
                None => value.clone(),
            };
            let sliced =
                restrict_to_current_range(&model, start, end).map_err(|source| {
                    CacheError::Series {
                        id: id.clone(),
                        source,
                    }
                })?;
            staged.push((id.clone(), model));
            window.insert(id.clone(), sliced);
        }
        self.entries.extend(staged);
        Ok(window)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn check_kind(id: &str, model: &ItemValue, window: &ItemValue) -> Result<(), CacheError> {
    if model.item_type() != window.item_type() {
        return Err(CacheError::TypeMismatch {
            id: id.to_string(),
            model: model.item_type().type_name(),
            window: window.item_type().type_name(),
        });
    }
    Ok(())
}
