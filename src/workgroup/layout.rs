//! Argument-buffer layout.
//!
//! Devices that enter kernels through a single packed buffer need host
//! code and launcher to agree on where each argument lives. The layout is
//! a pure function of the kernel signature and the device:
//!
//! ```text
//! params in declaration order
//! slot.offset = align_to(end of previous slot, slot.align)
//! buffer size = align_to(end of last slot, max slot align)
//! ```
//!
//! `LayoutCache` remembers layouts by a content fingerprint so that a
//! recomputation which disagrees with what host code was built against
//! is caught instead of silently reordering arguments.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::device::DeviceConfig;
use crate::diagnostic::Diagnostic;
use crate::ir::{checked_align_to, Function, Type};
use crate::span::Span;

/// How a slot's bytes are interpreted by the arg-buffer launcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// Scalar passed directly.
    Scalar,
    /// Pointer into global, constant or private memory.
    Pointer,
    /// Aggregate stored inline; the launcher copies it to private storage.
    ByValue,
    /// Pointer into work-group local memory. When `launcher_allocates` is
    /// set the slot holds the buffer's byte size (as `size_t`) instead of
    /// a pointer.
    Local { launcher_allocates: bool },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSlot {
    pub index: u32,
    pub offset: u64,
    pub size: u64,
    pub align: u64,
    pub kind: SlotKind,
}

impl ArgSlot {
    pub fn is_pointer_to_local(&self) -> bool {
        matches!(self.kind, SlotKind::Local { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgBufferLayout {
    pub kernel: String,
    pub slots: Vec<ArgSlot>,
    pub size: u64,
    pub align: u64,
    /// Hex blake3 digest of (signature, device) the layout was computed
    /// from.
    pub fingerprint: String,
}

impl ArgBufferLayout {
    /// Lay out the arguments of `kernel` for `cfg`.
    pub fn compute(kernel: &Function, cfg: &DeviceConfig) -> Result<Self, Diagnostic> {
        let ptr_bytes = cfg.ptr_bytes();
        let mut slots = Vec::with_capacity(kernel.params.len());
        let mut offset = 0u64;
        let mut max_align = 1u64;

        for (i, param) in kernel.params.iter().enumerate() {
            let kind = match (&param.ty, param.by_value) {
                (ty, true) if ty.is_aggregate() => SlotKind::ByValue,
                (Type::Ptr(space), false) if *space == cfg.address_spaces.local => {
                    SlotKind::Local {
                        launcher_allocates: cfg.alloca_locals,
                    }
                }
                (Type::Ptr(_), false) => SlotKind::Pointer,
                (ty, false) if !ty.is_aggregate() => SlotKind::Scalar,
                (ty, _) => {
                    return Err(Diagnostic::error(
                        format!(
                            "parameter '{}' of '{}' has type {} which cannot be passed {}",
                            param.name,
                            kernel.name,
                            ty,
                            if param.by_value { "by value" } else { "directly" }
                        ),
                        Span::dummy(),
                    ))
                }
            };
            let (size, align) = match kind {
                SlotKind::Local {
                    launcher_allocates: true,
                } => {
                    let width = cfg.size_t_bytes().max(ptr_bytes);
                    (width, width)
                }
                _ => match param.ty.checked_size(ptr_bytes) {
                    Some(size) => (size, param.ty.align(ptr_bytes)),
                    None => return Err(too_large(kernel, &param.name)),
                },
            };
            let start = checked_align_to(offset, align)
                .ok_or_else(|| too_large(kernel, &param.name))?;
            slots.push(ArgSlot {
                index: i as u32,
                offset: start,
                size,
                align,
                kind,
            });
            offset = start
                .checked_add(size)
                .ok_or_else(|| too_large(kernel, &param.name))?;
            max_align = max_align.max(align);
        }
        let size = checked_align_to(offset, max_align).ok_or_else(|| {
            Diagnostic::error(
                format!("argument buffer of '{}' does not fit in 64 bits", kernel.name),
                Span::dummy(),
            )
        })?;

        Ok(Self {
            kernel: kernel.name.clone(),
            slots,
            size,
            align: max_align,
            fingerprint: fingerprint(kernel, cfg),
        })
    }

    pub fn slot(&self, index: u32) -> Option<&ArgSlot> {
        self.slots.iter().find(|s| s.index == index)
    }

    /// Pack host-side argument bytes (one entry per slot, each exactly the
    /// slot's size) into a buffer.
    pub fn pack(&self, args: &[&[u8]]) -> Result<Vec<u8>, String> {
        if args.len() != self.slots.len() {
            return Err(format!(
                "'{}' takes {} arguments, got {}",
                self.kernel,
                self.slots.len(),
                args.len()
            ));
        }
        let mut buffer = vec![0u8; self.size as usize];
        for (slot, bytes) in self.slots.iter().zip(args) {
            if bytes.len() as u64 != slot.size {
                return Err(format!(
                    "argument {} of '{}' is {} bytes, slot holds {}",
                    slot.index,
                    self.kernel,
                    bytes.len(),
                    slot.size
                ));
            }
            let at = slot.offset as usize;
            buffer[at..at + bytes.len()].copy_from_slice(bytes);
        }
        Ok(buffer)
    }
}

fn too_large(kernel: &Function, param: &str) -> Diagnostic {
    Diagnostic::error(
        format!(
            "parameter '{}' of '{}' is too large for an argument buffer",
            param, kernel.name
        ),
        Span::dummy(),
    )
}

/// Content fingerprint of everything the layout depends on.
pub fn fingerprint(kernel: &Function, cfg: &DeviceConfig) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"wglaunch.argbuffer.v1");
    for param in &kernel.params {
        hasher.update(param.ty.to_string().as_bytes());
        hasher.update(if param.by_value { b"!" } else { b";" });
    }
    let spaces = &cfg.address_spaces;
    for word in [
        cfg.address_bits,
        cfg.size_t_width,
        spaces.global,
        spaces.local,
        spaces.constant,
        u32::from(cfg.alloca_locals),
    ] {
        hasher.update(&word.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

impl fmt::Display for ArgBufferLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} bytes, align {}",
            self.kernel, self.size, self.align
        )?;
        for slot in &self.slots {
            let kind = match slot.kind {
                SlotKind::Scalar => "scalar",
                SlotKind::Pointer => "pointer",
                SlotKind::ByValue => "byval",
                SlotKind::Local {
                    launcher_allocates: true,
                } => "local (size)",
                SlotKind::Local {
                    launcher_allocates: false,
                } => "local (pointer)",
            };
            writeln!(
                f,
                "  arg{} @{} size {} align {} {}",
                slot.index, slot.offset, slot.size, slot.align, kind
            )?;
        }
        Ok(())
    }
}

// ─── Cache ─────────────────────────────────────────────────────────

/// Layouts recorded per kernel. Serializes to a JSON lock file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutCache {
    #[serde(default)]
    layouts: BTreeMap<String, ArgBufferLayout>,
}

impl LayoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kernel: &str) -> Option<&ArgBufferLayout> {
        self.layouts.get(kernel)
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArgBufferLayout> {
        self.layouts.values()
    }

    /// Fail when a layout for the same kernel and fingerprint was recorded
    /// with different slots.
    pub fn check(&self, layout: &ArgBufferLayout) -> Result<(), Diagnostic> {
        let Some(recorded) = self.layouts.get(&layout.kernel) else {
            return Ok(());
        };
        if recorded.fingerprint != layout.fingerprint || recorded == layout {
            return Ok(());
        }
        let mut diag = Diagnostic::error(
            format!(
                "argument buffer layout of '{}' disagrees with the recorded layout",
                layout.kernel
            ),
            Span::dummy(),
        );
        if let Some((was, now)) = recorded
            .slots
            .iter()
            .zip(&layout.slots)
            .find(|(a, b)| a != b)
        {
            diag = diag.with_note(format!(
                "arg{} was recorded at offset {} (size {}), computed at offset {} (size {})",
                was.index, was.offset, was.size, now.offset, now.size
            ));
        } else if recorded.size != layout.size {
            diag = diag.with_note(format!(
                "buffer was recorded as {} bytes, computed as {}",
                recorded.size, layout.size
            ));
        }
        Err(diag.with_help("regenerate the layout lock file and rebuild host code against it"))
    }

    /// Record `layout`, replacing an entry for an older signature.
    pub fn record(&mut self, layout: ArgBufferLayout) -> Result<(), Diagnostic> {
        self.check(&layout)?;
        if let Some(old) = self.layouts.get(&layout.kernel) {
            if old.fingerprint != layout.fingerprint {
                warn!(kernel = %layout.kernel, "signature changed, replacing recorded layout");
            }
        }
        debug!(kernel = %layout.kernel, size = layout.size, "recorded argument buffer layout");
        self.layouts.insert(layout.kernel.clone(), layout);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                format!("cannot read '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Diagnostic::error(
                format!("invalid layout lock '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })
    }

    /// Load `path` if it exists, otherwise start empty.
    pub fn load_or_default(path: &Path) -> Result<Self, Diagnostic> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Diagnostic> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            Diagnostic::error(format!("cannot serialize layouts: {}", e), Span::dummy())
        })?;
        std::fs::write(path, json + "\n").map_err(|e| {
            Diagnostic::error(
                format!("cannot write '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })
    }
}
