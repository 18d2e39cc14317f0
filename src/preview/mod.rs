// Preview pipeline: per-frame capture and hand-off to the render context.

pub mod capture;
pub mod publish;
