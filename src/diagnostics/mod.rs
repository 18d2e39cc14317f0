// Diagnostics: frame and drop counters shared by capture and render.

pub mod stats;
