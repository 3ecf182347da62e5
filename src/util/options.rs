//! Heap options.
//!
//! All options live in one [`Options`] struct that is constructed once, before the heap. Options
//! can be set
//! * programmatically, by assigning the public fields,
//! * by environment variables `VMHEAP_<SNAKE_CASE_NAME>` (e.g. `VMHEAP_MAX_HEAP_SIZE=64M`), read
//!   by `Options::default()`,
//! * by name, with [`Options::set_from_camelcase_str`] (e.g. `"MaxTLABSize"`, `"4M"`), which is
//!   how a host VM forwards its command line.
//!
//! Each option has a validator for its own value. Constraints between options (such as
//! `MinTLABSize <= MaxTLABSize`) are checked by [`Options::validate`], which every heap
//! constructor calls so that an invalid combination fails fast.

use crate::util::constants::*;
use crate::util::conversions::raw_is_aligned;
use crate::util::error::HeapError;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// Which collector (and therefore which barrier set) the heap uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumString, Display)]
pub enum CollectorSelector {
    /// Bump-pointer allocation, heap expansion, no reclamation. No barriers.
    Epsilon,
    /// Concurrent region-based mark and relocate with SATB and load-reference barriers.
    Shenandoah,
}

/// Heuristics of the concurrent collector. They change when a cycle starts and which regions are
/// relocated, never the barrier protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumString, Display)]
pub enum HeuristicsMode {
    Adaptive,
    Static,
    Compact,
    Aggressive,
}

/// A size in bytes. Parses `4096`, `4K`, `16M`, `1G` (case-insensitive suffixes).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemorySize(pub usize);

impl Deref for MemorySize {
    type Target = usize;
    fn deref(&self) -> &usize {
        &self.0
    }
}

impl FromStr for MemorySize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, shift) = match s.chars().last() {
            Some('k') | Some('K') => (&s[..s.len() - 1], LOG_BYTES_IN_KBYTE),
            Some('m') | Some('M') => (&s[..s.len() - 1], LOG_BYTES_IN_MBYTE),
            Some('g') | Some('G') => (&s[..s.len() - 1], LOG_BYTES_IN_GBYTE),
            _ => (s, 0),
        };
        let value: usize = digits
            .parse()
            .map_err(|e| format!("Failed to parse size {:?}: {}", s, e))?;
        value
            .checked_shl(shift as u32)
            .filter(|v| v >> shift == value)
            .map(MemorySize)
            .ok_or_else(|| format!("Size {:?} overflows", s))
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            crate::util::conversions::bytes_to_formatted_string(self.0)
        )
    }
}

fn always_valid<T>(_: &T) -> bool {
    true
}

fn non_zero_size(v: &MemorySize) -> bool {
    v.0 > 0
}

fn percentage(v: &usize) -> bool {
    *v <= 100
}

/// The prefix of environment variables that set options.
pub const ENV_PREFIX: &str = "VMHEAP_";

macro_rules! options {
    ($($(#[$doc:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$doc])* $name: $type[$validator] = $default),*);
    ];
    ($($(#[$doc:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$doc])* pub $name: $type),*
        }
        impl Options {
            /// Set an option from its snake-case name. Returns false (and keeps the old value) if
            /// the value cannot be parsed or is invalid.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => match val.parse::<$type>() {
                        Ok(val) => {
                            // Validate
                            let validate_fn = $validator;
                            let is_valid = validate_fn(&val);
                            if is_valid {
                                // Only set value if valid.
                                self.$name = val;
                            } else {
                                warn!("Unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                            }
                            is_valid
                        }
                        Err(_) => {
                            warn!("Unable to set {}={:?}. Can't parse value. Default value will be used.", s, val);
                            false
                        }
                    },)*
                    _ => {
                        warn!("Unknown option {:?}", s);
                        false
                    }
                }
            }

            /// The options with their built-in defaults, ignoring the environment.
            pub fn builtin_defaults() -> Self {
                Options {
                    $($name: $default),*
                }
            }

            /// Read all the options that are set through environment variables.
            pub fn read_env_var_settings(&mut self) {
                // If we have env vars that start with VMHEAP_ and match any option (such as VMHEAP_MAX_HEAP_SIZE),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(ENV_PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { self.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Options::builtin_defaults();
                options.read_env_var_settings();
                options
            }
        }
    ]
}

options! {
    /// The collector to use.
    collector:                  CollectorSelector [always_valid] = CollectorSelector::Epsilon,
    /// Committed heap size at start-up.
    initial_heap_size:          MemorySize        [non_zero_size] = MemorySize(16 << LOG_BYTES_IN_MBYTE),
    /// Reserved heap size. The heap never grows beyond this.
    max_heap_size:              MemorySize        [non_zero_size] = MemorySize(64 << LOG_BYTES_IN_MBYTE),
    /// Minimal step of on-demand heap growth.
    min_heap_expand:            MemorySize        [non_zero_size] = MemorySize(128 << LOG_BYTES_IN_MBYTE),
    /// Lower bound of TLAB sizes.
    min_tlab_size:              MemorySize        [non_zero_size] = MemorySize(2 << LOG_BYTES_IN_KBYTE),
    /// Upper bound of TLAB sizes.
    max_tlab_size:              MemorySize        [non_zero_size] = MemorySize(4 << LOG_BYTES_IN_MBYTE),
    /// Terminate the process instead of returning failure when an allocation cannot be satisfied.
    exit_on_out_of_memory_error: bool             [always_valid] = false,
    /// Grow TLABs elastically with the thread's allocation demand.
    elastic_tlab:               bool              [always_valid] = true,
    /// Shrink the TLAB size of threads that have not allocated recently.
    elastic_tlab_decay:         bool              [always_valid] = true,
    /// Milliseconds without a TLAB refill before a thread's TLAB size decays.
    tlab_decay_time:            u64               [|v: &u64| *v > 0] = 1000,
    /// Print heap occupancy this many times while the heap grows to its maximum. 0 disables it.
    print_heap_steps:           usize             [always_valid] = 20,
    /// Update the monitoring counters every this many bytes of allocation.
    update_counters_step:       MemorySize        [non_zero_size] = MemorySize(1 << LOG_BYTES_IN_MBYTE),
    /// Cycle heuristics of the concurrent collector.
    heuristics:                 HeuristicsMode    [always_valid] = HeuristicsMode::Adaptive,
    /// Region size of the concurrent collector.
    region_size:                MemorySize        [|v: &MemorySize| v.0.is_power_of_two() && v.0 >= BYTES_IN_PAGE] = MemorySize(256 << LOG_BYTES_IN_KBYTE),
    /// Regions with at least this much garbage (percent of region size) are relocated.
    garbage_threshold:          usize             [percentage] = 25,
    /// Start a cycle when free memory falls below this percentage of the maximum heap.
    min_free_threshold:         usize             [percentage] = 10,
    /// Percentage of the maximum heap kept back from mutators for evacuation.
    evac_reserve:               usize             [percentage] = 5,
    /// Number of concurrent marking/evacuation workers.
    conc_gc_threads:            usize             [|v: &usize| *v > 0] = (num_cpus::get() / 4).max(1),
    /// Capacity of a thread's SATB buffer before it is flushed to the global list.
    satb_buffer_size:           usize             [|v: &usize| *v > 0] = 1024,
    /// Let the load-reference barrier rewrite the loaded slot with the resolved reference.
    self_healing:               bool              [always_valid] = true,
    /// Mark the region of a written slot dirty after each reference store.
    card_barrier:               bool              [always_valid] = true,
    /// Milliseconds between two heuristics checks of the concurrent collector's controller.
    control_interval:           u64               [|v: &u64| *v > 0] = 10,
}

impl Options {
    /// Set an option by its camel-case name, as the host VM's command line spells it
    /// (`MaxTLABSize`, `ExitOnOutOfMemoryError`, `SATBBufferSize`).
    pub fn set_from_camelcase_str(&mut self, s: &str, val: &str) -> bool {
        trace!("Trying to process option pair: ({}, {})", s, val);

        let sr = camel_to_snake(s);
        let result = self.set_from_str(sr.as_str(), val);

        trace!("Trying to process option pair: ({})", sr);

        if result {
            trace!("Validation passed");
        } else {
            trace!("Validation failed")
        }
        result
    }

    /// Set multiple options from a string like `"MaxHeapSize=64M InitialHeapSize=16M"`.
    pub fn set_bulk_from_command_line(&mut self, options: &str) -> bool {
        for opt in options.split_ascii_whitespace() {
            let kv_pair: Vec<&str> = opt.split('=').collect();
            if kv_pair.len() != 2 {
                return false;
            }
            if !self.set_from_camelcase_str(kv_pair[0], kv_pair[1]) {
                return false;
            }
        }
        true
    }

    /// Check the constraints between options.
    pub fn validate(&self) -> Result<(), HeapError> {
        let fail = |msg: String| Err(HeapError::InvalidOptions(msg));
        if *self.min_tlab_size > *self.max_tlab_size {
            return fail(format!(
                "MinTLABSize ({}) is larger than MaxTLABSize ({})",
                self.min_tlab_size, self.max_tlab_size
            ));
        }
        if *self.initial_heap_size > *self.max_heap_size {
            return fail(format!(
                "InitialHeapSize ({}) is larger than MaxHeapSize ({})",
                self.initial_heap_size, self.max_heap_size
            ));
        }
        if !raw_is_aligned(*self.min_tlab_size, MIN_OBJECT_ALIGNMENT)
            || !raw_is_aligned(*self.max_tlab_size, MIN_OBJECT_ALIGNMENT)
        {
            return fail("TLAB sizes must be word aligned".to_string());
        }
        if self.collector == CollectorSelector::Shenandoah {
            if *self.max_heap_size < 2 * *self.region_size {
                return fail(format!(
                    "MaxHeapSize ({}) must hold at least two regions of {}",
                    self.max_heap_size, self.region_size
                ));
            }
            if *self.min_tlab_size > *self.region_size {
                return fail(format!(
                    "MinTLABSize ({}) is larger than RegionSize ({})",
                    self.min_tlab_size, self.region_size
                ));
            }
        }
        Ok(())
    }
}

/// `MaxTLABSize` -> `max_tlab_size`, `ConcGCThreads` -> `conc_gc_threads`.
fn camel_to_snake(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut sr = String::with_capacity(s.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let acronym_end = i > 0
                && chars[i - 1].is_uppercase()
                && chars.get(i + 1).map_or(false, |n| n.is_lowercase());
            if prev_lower || acronym_end {
                sr.push('_');
            }
            sr.extend(c.to_lowercase());
        } else {
            sr.push(*c);
        }
    }
    sr
}
