use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use time::OffsetDateTime;

use super::{Catalogue, ProtocolError, methods};
use crate::cache::WindowCache;
use crate::config::ItemsConfig;
use crate::items::time::format_datetime;
use crate::items::{
    CodecContext, FIRSTDATE_INIT, FIRSTDATE_SIM, ItemRole, ItemType, ItemValue, ItemValues,
    LASTDATE_INIT, LASTDATE_SIM, STEPSIZE, Series1D, ServerItem, codec, synthetic_items,
};
use crate::wire::{Properties, Transport, WireError};

/// A simulation period: first and last date plus step length in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeGrid {
    pub first: OffsetDateTime,
    pub last: OffsetDateTime,
    pub step: i64,
}

impl TimeGrid {
    pub fn context(&self) -> CodecContext {
        CodecContext::new(
            self.first.unix_timestamp(),
            self.last.unix_timestamp(),
            self.step,
        )
    }

    fn read(
        props: &Properties,
        first_key: &str,
        last_key: &str,
        fallback_step: Option<i64>,
    ) -> Result<Self, ProtocolError> {
        let first = decode_synthetic(props, first_key, ItemType::Time)?;
        let last = decode_synthetic(props, last_key, ItemType::Time)?;
        let step = match (props.get(STEPSIZE), fallback_step) {
            (None, Some(step)) => step,
            _ => decode_synthetic(props, STEPSIZE, ItemType::Duration)?
                .as_duration()
                .unwrap_or_default(),
        };
        Ok(Self {
            first: first.as_time().unwrap_or(OffsetDateTime::UNIX_EPOCH),
            last: last.as_time().unwrap_or(OffsetDateTime::UNIX_EPOCH),
            step,
        })
    }

    fn insert_into(&self, values: &mut ItemValues) {
        values.insert(FIRSTDATE_SIM.to_string(), ItemValue::Time(self.first));
        values.insert(LASTDATE_SIM.to_string(), ItemValue::Time(self.last));
        values.insert(STEPSIZE.to_string(), ItemValue::Duration(self.step));
    }

    fn dates_body(&self) -> Properties {
        let mut body = Properties::new();
        body.insert(FIRSTDATE_SIM, format_datetime(self.first));
        body.insert(LASTDATE_SIM, format_datetime(self.last));
        body
    }
}

struct InstanceState {
    window: TimeGrid,
    cache: WindowCache,
}

/// Speaks the engine protocol for one server process.
///
/// Owns the transport; callers serialize access, so every method takes
/// `&mut self` and runs exactly one operation at a time.
pub struct ProtocolCaller {
    process: usize,
    transport: Box<dyn Transport>,
    catalogue: Arc<Catalogue>,
    fixed: ItemValues,
    init_grid: TimeGrid,
    instances: HashMap<String, InstanceState>,
    desync: Option<String>,
}

impl ProtocolCaller {
    /// Discover the catalogue and fetch the fixed items of a ready server.
    pub fn connect(
        process: usize,
        transport: Box<dyn Transport>,
        items: &ItemsConfig,
    ) -> Result<Self, ProtocolError> {
        let catalogue = discover_item_catalogue(transport.as_ref(), items)?;
        let (init_grid, fixed) = fetch_fixed_items(transport.as_ref(), &catalogue, &items.fixed)?;
        tracing::debug!(
            process,
            items = catalogue.len(),
            fixed = fixed.len(),
            first = %format_datetime(init_grid.first),
            last = %format_datetime(init_grid.last),
            step = init_grid.step,
            "item catalogue discovered"
        );
        Ok(Self {
            process,
            transport,
            catalogue: Arc::new(catalogue),
            fixed,
            init_grid,
            instances: HashMap::new(),
            desync: None,
        })
    }

    pub fn catalogue(&self) -> Arc<Catalogue> {
        Arc::clone(&self.catalogue)
    }

    pub fn fixed_items(&self) -> &ItemValues {
        &self.fixed
    }

    /// Initialisation grid; the model's overall time horizon.
    pub fn time_horizon(&self) -> TimeGrid {
        self.init_grid
    }

    /// Current simulation window of an initialized instance.
    pub fn window(&self, id: &str) -> Option<TimeGrid> {
        self.instances.get(id).map(|state| state.window)
    }

    pub fn is_initialized(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    pub fn is_desynchronized(&self) -> bool {
        self.desync.is_some()
    }

    /// Register default values for `id` and seed its window with the
    /// initialisation dates. Returns `false` without wire traffic when the
    /// instance is already initialized.
    pub fn initialize(&mut self, id: &str) -> Result<bool, ProtocolError> {
        self.ensure_synchronized()?;
        if self.instances.contains_key(id) {
            tracing::debug!(process = self.process, instance = id, "already initialized");
            return Ok(false);
        }
        self.round_trip(|t| t.get(Some(id), methods::REGISTER_DEFAULTS))?;
        let body = self.init_grid.dates_body();
        self.round_trip(|t| t.post(Some(id), methods::REGISTER_SIMULATION_DATES, &body))?;
        self.instances.insert(
            id.to_string(),
            InstanceState {
                window: self.init_grid,
                cache: WindowCache::new(),
            },
        );
        tracing::info!(process = self.process, instance = id, "instance initialized");
        Ok(true)
    }

    /// Every readable item of `id` over the model range, plus the fixed items.
    pub fn get_item_values(&mut self, id: &str) -> Result<ItemValues, ProtocolError> {
        self.ensure_synchronized()?;
        self.ensure_initialized(id)?;
        let response = self.round_trip(|t| t.get(Some(id), methods::GET_ITEM_VALUES))?;
        let (window, decoded) = match self.decode_response(&response) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.mark_desynchronized(&err);
                return Err(err);
            }
        };

        let Some(state) = self.instances.get_mut(id) else {
            return Err(ProtocolError::NotInitialized(id.to_string()));
        };
        let mut values = state.cache.absorb(decoded)?;
        state.window = window;
        for (item, value) in &self.fixed {
            values.insert(item.clone(), value.clone());
        }
        Ok(values)
    }

    /// Send writable values for `id`, sliced to the (possibly new) window.
    pub fn set_item_values(&mut self, id: &str, values: &ItemValues) -> Result<(), ProtocolError> {
        self.ensure_synchronized()?;
        let catalogue = Arc::clone(&self.catalogue);
        let Some(state) = self.instances.get(id) else {
            return Err(ProtocolError::NotInitialized(id.to_string()));
        };

        for (item_id, value) in values {
            let item = catalogue
                .get(item_id)
                .ok_or_else(|| ProtocolError::UnknownItem(item_id.clone()))?;
            if !item.role.is_writable() {
                return Err(ProtocolError::NotWritable(item_id.clone()));
            }
            if value.item_type() != item.item_type {
                return Err(ProtocolError::TypeMismatch {
                    id: item_id.clone(),
                    expected: item.item_type,
                    found: value.item_type(),
                });
            }
        }

        let window = TimeGrid {
            first: requested_time(values, FIRSTDATE_SIM).unwrap_or(state.window.first),
            last: requested_time(values, LASTDATE_SIM).unwrap_or(state.window.last),
            step: state.window.step,
        };

        let mut staged: ItemValues = values
            .iter()
            .filter(|(item_id, _)| !is_synthetic(item_id))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        complete_columns(&catalogue, &state.cache, &mut staged)?;

        let mut cache = state.cache.clone();
        let ctx = window.context();
        let sliced = cache.stage(&staged, ctx.first, ctx.last)?;
        let body = encode_body(&catalogue, &window, &sliced)?;

        self.round_trip(|t| t.post(Some(id), methods::SET_ITEM_VALUES, &body))?;
        if let Some(state) = self.instances.get_mut(id) {
            state.window = window;
            state.cache = cache;
        }
        tracing::debug!(process = self.process, instance = id, items = values.len(), "item values registered");
        Ok(())
    }

    /// Run the engine over the instance's current window.
    pub fn simulate(&mut self, id: &str) -> Result<(), ProtocolError> {
        self.ensure_synchronized()?;
        self.ensure_initialized(id)?;
        self.round_trip(|t| t.get(Some(id), methods::SIMULATE))?;
        tracing::debug!(process = self.process, instance = id, "simulation finished");
        Ok(())
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    fn ensure_synchronized(&self) -> Result<(), ProtocolError> {
        match &self.desync {
            Some(reason) => Err(ProtocolError::Desynchronized {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn ensure_initialized(&self, id: &str) -> Result<(), ProtocolError> {
        if self.instances.contains_key(id) {
            Ok(())
        } else {
            Err(ProtocolError::NotInitialized(id.to_string()))
        }
    }

    fn round_trip<T>(
        &mut self,
        call: impl FnOnce(&dyn Transport) -> Result<T, WireError>,
    ) -> Result<T, ProtocolError> {
        call(self.transport.as_ref()).map_err(|err| {
            let err = ProtocolError::from(err);
            self.mark_desynchronized(&err);
            err
        })
    }

    fn mark_desynchronized(&mut self, err: &ProtocolError) {
        tracing::error!(
            process = self.process,
            error = %err,
            effect = err.effect().as_str(),
            "round trip failed; server process is now considered desynchronized"
        );
        self.desync = Some(err.to_string());
    }

    fn decode_response(&self, response: &Properties) -> Result<(TimeGrid, ItemValues), ProtocolError> {
        let window = TimeGrid::read(
            response,
            FIRSTDATE_SIM,
            LASTDATE_SIM,
            Some(self.init_grid.step),
        )?;
        let ctx = window.context();
        let mut values = ItemValues::new();
        window.insert_into(&mut values);

        for item in self.catalogue.iter() {
            if is_synthetic(&item.id) || item.column.is_some() || self.fixed.contains_key(&item.id) {
                continue;
            }
            values.insert(item.id.clone(), decode_item(response, item, &ctx)?);
        }

        for parent in self.catalogue.exploded() {
            let ItemValue::Series1D(series) = decode_item(response, parent, &ctx)? else {
                continue;
            };
            for column in self.catalogue.columns_of(&parent.id) {
                let index = column.column.as_ref().map_or(0, |c| c.index);
                let part = series.column(index).map_err(|source| ProtocolError::Columns {
                    parent: parent.id.clone(),
                    source,
                })?;
                values.insert(column.id.clone(), ItemValue::Series0D(part));
            }
        }
        Ok((window, values))
    }
}

fn discover_item_catalogue(
    transport: &dyn Transport,
    items: &ItemsConfig,
) -> Result<Catalogue, ProtocolError> {
    let types = transport.get(None, methods::QUERY_ITEM_TYPES)?;
    let mut catalogue = Catalogue::default();
    for item in synthetic_items() {
        catalogue.push(item);
    }

    let mut exploded = Vec::new();
    for (id, type_name) in types.iter() {
        let item_type =
            ItemType::from_type_name(type_name).map_err(|source| ProtocolError::UnknownType {
                id: id.to_string(),
                source,
            })?;
        let role = if items.outputs.iter().any(|o| o == id) {
            ItemRole::Output
        } else {
            ItemRole::InOut
        };
        let item = ServerItem::new(id, role, item_type);
        if items.exploded.iter().any(|e| e == id) {
            if item_type != ItemType::TimeSeries1D {
                return Err(ProtocolError::NotExplodable {
                    id: id.to_string(),
                    item_type,
                });
            }
            exploded.push(item);
        } else {
            catalogue.push(item);
        }
    }

    if !exploded.is_empty() {
        let names = transport.get(None, methods::QUERY_ITEM_SUBNAMES)?;
        for parent in exploded {
            let raw = names.get(&parent.id).ok_or_else(|| ProtocolError::MissingItem {
                id: parent.id.clone(),
            })?;
            let columns = parse_name_list(raw);
            catalogue.push_exploded(parent, &columns);
        }
    }
    Ok(catalogue)
}

fn fetch_fixed_items(
    transport: &dyn Transport,
    catalogue: &Catalogue,
    fixed: &[String],
) -> Result<(TimeGrid, ItemValues), ProtocolError> {
    let response = transport.get(None, methods::QUERY_FIXED_ITEMS)?;
    let init_grid = TimeGrid::read(&response, FIRSTDATE_INIT, LASTDATE_INIT, None)?;
    let ctx = init_grid.context();
    let mut values = ItemValues::new();
    for id in fixed {
        let item = catalogue
            .get(id)
            .filter(|item| item.column.is_none())
            .ok_or_else(|| ProtocolError::UnknownItem(id.clone()))?;
        values.insert(id.clone(), decode_item(&response, item, &ctx)?);
    }
    Ok((init_grid, values))
}

/// `[a, b, 'c']` to its bare names.
fn parse_name_list(raw: &str) -> Vec<String> {
    let inner = raw
        .trim()
        .trim_start_matches(['[', '('])
        .trim_end_matches([']', ')']);
    inner
        .split(',')
        .map(|name| name.trim().trim_matches(['\'', '"']).to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn decode_item(
    response: &Properties,
    item: &ServerItem,
    ctx: &CodecContext,
) -> Result<ItemValue, ProtocolError> {
    let raw = response
        .get(&item.id)
        .ok_or_else(|| ProtocolError::MissingItem {
            id: item.id.clone(),
        })?;
    codec(item.item_type)
        .parse(raw, Some(ctx))
        .map_err(|source| ProtocolError::Decode {
            id: item.id.clone(),
            source,
        })
}

fn decode_synthetic(
    props: &Properties,
    key: &str,
    item_type: ItemType,
) -> Result<ItemValue, ProtocolError> {
    let raw = props.get(key).ok_or_else(|| ProtocolError::MissingItem {
        id: key.to_string(),
    })?;
    codec(item_type)
        .parse(raw, None)
        .map_err(|source| ProtocolError::Decode {
            id: key.to_string(),
            source,
        })
}

fn is_synthetic(id: &str) -> bool {
    matches!(id, FIRSTDATE_SIM | LASTDATE_SIM | STEPSIZE)
}

fn requested_time(values: &ItemValues, key: &str) -> Option<OffsetDateTime> {
    values.get(key).and_then(ItemValue::as_time)
}

/// Fill in columns the caller left out from their last known values so
/// every touched exploded parent can be sent whole.
fn complete_columns(
    catalogue: &Catalogue,
    cache: &WindowCache,
    staged: &mut ItemValues,
) -> Result<(), ProtocolError> {
    for parent in catalogue.exploded() {
        let columns = catalogue.columns_of(&parent.id);
        if !columns.iter().any(|c| staged.contains_key(&c.id)) {
            continue;
        }
        for column in columns {
            if staged.contains_key(&column.id) {
                continue;
            }
            let known = cache
                .get(&column.id)
                .ok_or_else(|| ProtocolError::MissingColumn {
                    parent: parent.id.clone(),
                    column: column.id.clone(),
                })?;
            staged.insert(column.id.clone(), known.clone());
        }
    }
    Ok(())
}

fn encode_body(
    catalogue: &Catalogue,
    window: &TimeGrid,
    sliced: &ItemValues,
) -> Result<Properties, ProtocolError> {
    let mut body = window.dates_body();
    let mut parents: BTreeMap<&str, Vec<(usize, &ItemValue)>> = BTreeMap::new();

    for (id, value) in sliced {
        let column = catalogue.get(id).and_then(|item| item.column.as_ref());
        if let Some(column) = column {
            parents
                .entry(column.parent.as_str())
                .or_default()
                .push((column.index, value));
            continue;
        }
        let text = codec(value.item_type())
            .print(value)
            .map_err(|source| ProtocolError::Encode {
                id: id.clone(),
                source,
            })?;
        body.insert(id.clone(), text);
    }

    for (parent, mut columns) in parents {
        columns.sort_by_key(|(index, _)| *index);
        let series: Vec<_> = columns
            .iter()
            .filter_map(|(_, value)| value.as_series().cloned())
            .collect();
        let joined = Series1D::from_columns(&series).map_err(|source| ProtocolError::Columns {
            parent: parent.to_string(),
            source,
        })?;
        let value = ItemValue::Series1D(joined);
        let text = codec(ItemType::TimeSeries1D)
            .print(&value)
            .map_err(|source| ProtocolError::Encode {
                id: parent.to_string(),
                source,
            })?;
        body.insert(parent, text);
    }
    Ok(body)
}
