// Trait to generalize over primitive number types with at least 8-byte
// alignment, so a receive buffer of them can be viewed as f64 payload.
pub trait Align8: bytemuck::Pod {}

impl Align8 for u64 {}
impl Align8 for i64 {}
impl Align8 for f64 {}
