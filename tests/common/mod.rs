pub(crate) mod blocks;

pub(crate) mod logging;

pub(crate) mod records;
