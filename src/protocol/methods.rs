//! Method token sequences.
//!
//! Each high-level operation is one round trip whose comma-joined token list
//! the engine executes left to right. Reordering a list changes what the
//! engine does.

/// Item names and their reported type strings.
pub const QUERY_ITEM_TYPES: &[&str] = &["GET_query_itemtypes"];

/// Ordered column names of 1-D items.
pub const QUERY_ITEM_SUBNAMES: &[&str] = &["GET_query_itemsubnames"];

/// Initialisation grid plus the initial values of every item.
pub const QUERY_FIXED_ITEMS: &[&str] = &[
    "GET_query_initialisationtimegrid",
    "GET_query_initialitemvalues",
];

/// Populate the instance's registers with default values.
pub const REGISTER_DEFAULTS: &[&str] = &[
    "GET_register_internalconditions",
    "GET_register_initialitemvalues",
];

pub const REGISTER_SIMULATION_DATES: &[&str] = &["POST_register_simulationdates"];

pub const GET_ITEM_VALUES: &[&str] = &[
    "GET_query_simulationdates",
    "GET_query_parameteritemvalues",
    "GET_query_conditionitemvalues",
    "GET_query_inputitemvalues",
    "GET_query_outputitemvalues",
    "GET_query_getitemvalues",
];

pub const SET_ITEM_VALUES: &[&str] = &[
    "POST_register_simulationdates",
    "POST_register_parameteritemvalues",
    "POST_register_conditionitemvalues",
    "POST_register_inputitemvalues",
];

pub const SIMULATE: &[&str] = &[
    "GET_activate_simulationdates",
    "GET_activate_parameteritemvalues",
    "GET_load_internalconditions",
    "GET_activate_conditionitemvalues",
    "GET_activate_inputitemvalues",
    "GET_simulate",
    "GET_save_internalconditions",
    "GET_update_conditionitemvalues",
    "GET_update_outputitemvalues",
    "GET_update_getitemvalues",
];
