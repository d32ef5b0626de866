use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Owner of tensor memory.
///
/// Every [`crate::Tensor`] holds an `Arc<Device>` and registers itself on
/// creation and release on drop, so the device always knows how many
/// tensors (and bytes) are alive. Leaks show up as a growing
/// [`Device::live_tensors`] count.
pub struct Device {
    name: String,
    live_tensors: AtomicUsize,
    live_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
}

impl Device {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            live_tensors: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
        })
    }

    pub fn cpu() -> Arc<Self> {
        Self::new("cpu")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn live_tensors(&self) -> usize {
        self.live_tensors.load(Ordering::SeqCst)
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn register(&self, values: usize) {
        let bytes = values * std::mem::size_of::<f32>();
        self.live_tensors.fetch_add(1, Ordering::SeqCst);
        let now = self.live_bytes.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.peak_bytes.fetch_max(now, Ordering::SeqCst);
    }

    pub(crate) fn release(&self, values: usize) {
        let bytes = values * std::mem::size_of::<f32>();
        self.live_tensors.fetch_sub(1, Ordering::SeqCst);
        self.live_bytes.fetch_sub(bytes, Ordering::SeqCst);
    }
}

impl Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "Device({}, tensors: {}, bytes: {})",
            self.name,
            self.live_tensors(),
            self.live_bytes()
        ))
    }
}
