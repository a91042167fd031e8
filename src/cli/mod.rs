pub(crate) mod docking;
pub(crate) mod pocket;
pub(crate) mod table;
