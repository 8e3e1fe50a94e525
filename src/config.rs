#[allow(dead_code)]
pub const DEFAULT_TX_SLOTS: usize = 8;

#[allow(dead_code)]
pub const DEFAULT_RX_SLOTS: usize = 8;

#[allow(dead_code)]
pub const DEFAULT_RTR_SLOTS: usize = 4;
