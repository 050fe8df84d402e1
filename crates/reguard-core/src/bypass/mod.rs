//! Integrity check bypass.
//!
//! Drives the scanner, resolver and patch engine over the game executable
//! according to the [`VariantProfile`] of the running game. Each logical
//! check site is located through its candidates in order; a site that cannot
//! be found or patched is reported and skipped, never fatal.

mod site;
mod timers;
mod variant;

pub use site::{CheckSite, Locator, MethodPatch, SiteAction, SiteReport, SiteStatus};
pub use timers::{UPDATE_TIMER_FIELDS, disable_update_timers};
pub use variant::{
    CHECKSUM_CALLBACK_CONSTANT, CHECKSUM_ENTRY_HASHES, FLAG_SITE, SWEEP_SITE, TIMER_MANAGERS,
    TargetVariant, VariantProfile,
};

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::BypassSettings;
use crate::error::{Error, Result};
use crate::memory::{ModuleInfo, ModuleQuery, ProcessMemory};
use crate::patch::{Patch, RETURN_FALSE, jcc_to_jmp, to_patch_bytes};
use crate::resolve::AddressResolver;
use crate::runtime::Runtime;
use crate::scan::{PatternSet, PatternSpec, Scanner, load_pattern_set};

/// Bytes at the end of the module left out of constant scans.
const CONSTANT_SCAN_TAIL: u64 = 0x100;

/// Instructions searched for the `call` in a method patched through its call.
const METHOD_CALL_SEARCH: usize = 10;

const CALL_OPCODE: u8 = 0xE8;

#[derive(Debug, Clone, Serialize)]
pub struct BypassReport {
    pub variant: TargetVariant,
    pub enabled: bool,
    pub flag_address: Option<u64>,
    pub sites: Vec<SiteReport>,
}

impl BypassReport {
    pub fn site(&self, name: &str) -> Option<&SiteReport> {
        self.sites.iter().find(|s| s.name == name)
    }

    pub fn patched_count(&self) -> usize {
        self.sites.iter().map(|s| s.patched.len()).sum()
    }
}

pub struct IntegrityBypass {
    profile: VariantProfile,
    overlay: PatternSet,
    enabled: bool,
    patches: Vec<Patch>,
    already_patched: HashSet<u64>,
    flag_address: Option<u64>,
    reports: Vec<SiteReport>,
}

impl IntegrityBypass {
    pub fn new(profile: VariantProfile, enabled: bool) -> Self {
        Self {
            profile,
            overlay: PatternSet::default(),
            enabled,
            patches: Vec::new(),
            already_patched: HashSet::new(),
            flag_address: None,
            reports: Vec::new(),
        }
    }

    /// Build from persisted settings. A pattern file that cannot be read is
    /// logged and ignored.
    pub fn from_settings(settings: &BypassSettings) -> Self {
        let bypass = Self::new(VariantProfile::for_variant(settings.target), settings.enabled);

        match &settings.pattern_file {
            Some(path) => match load_pattern_set(path) {
                Ok(set) => {
                    info!(
                        "Loaded {} extra pattern site(s) from {}",
                        set.sites.len(),
                        path.display()
                    );
                    bypass.with_overlay(set)
                }
                Err(e) => {
                    warn!("Ignoring pattern file {}: {}", path.display(), e);
                    bypass
                }
            },
            None => bypass,
        }
    }

    /// Extra candidate patterns, tried before the builtin ones.
    pub fn with_overlay(mut self, overlay: PatternSet) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn variant(&self) -> TargetVariant {
        self.profile.variant
    }

    pub fn profile(&self) -> &VariantProfile {
        &self.profile
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Takes effect on the next tick.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn flag_address(&self) -> Option<u64> {
        self.flag_address
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn report(&self) -> BypassReport {
        BypassReport {
            variant: self.profile.variant,
            enabled: self.enabled,
            flag_address: self.flag_address,
            sites: self.reports.clone(),
        }
    }

    /// Patches that have to be in place before the game's first frame, when
    /// no reflection data is available yet.
    pub fn run_startup_patches<M>(&mut self, memory: &M)
    where
        M: ProcessMemory + ModuleQuery + ?Sized,
    {
        if self.profile.startup.is_empty() {
            return;
        }
        info!("Scanning {} executable...", self.profile.variant);

        let Some(module) = self.main_module(memory) else {
            return;
        };

        for site in self.profile.startup.clone() {
            let report = self.patch_site(memory, &module, &site);
            self.record(report);
        }
    }

    /// Locate the flag and checksum branches, and patch reflected methods.
    pub fn initialize<M, R>(&mut self, memory: &M, runtime: &R)
    where
        M: ProcessMemory + ModuleQuery + ?Sized,
        R: Runtime + ?Sized,
    {
        let Some(module) = self.main_module(memory) else {
            return;
        };

        if !self.profile.flag.is_empty() || !self.overlay.patterns_for(FLAG_SITE).is_empty() {
            let report = self.locate_flag(memory, &module);
            self.record(report);
        }

        if !self.profile.sweep.is_empty() || !self.overlay.patterns_for(SWEEP_SITE).is_empty() {
            for &hash in &self.profile.ignored_entries {
                runtime.ignore_application_entry(hash);
            }
            let report = self.sweep(memory, &module);
            self.record(report);
        }

        for method in self.profile.methods.clone() {
            let report = self.patch_method(memory, runtime, &method);
            self.record(report);
        }

        info!("Integrity bypass initialized: {} patch(es)", self.patches.len());
    }

    /// Per-frame work: keep the flag set, keep update timers off, and bring
    /// toggleable patches in line with the enabled setting.
    pub fn tick<M, R>(&mut self, memory: &M, runtime: &R)
    where
        M: ProcessMemory + ?Sized,
        R: Runtime + ?Sized,
    {
        if self.enabled {
            if let Some(flag) = self.flag_address {
                if let Err(e) = memory.write_bytes(flag, &[1]) {
                    debug!("Could not set integrity flag at {:#x}: {}", flag, e);
                }
            }

            for manager in &self.profile.timer_managers {
                disable_update_timers(runtime, manager);
            }
        }

        for patch in self.patches.iter_mut().filter(|p| !p.is_immediate()) {
            if let Err(e) = patch.toggle(memory, self.enabled) {
                warn!("Could not toggle patch at {:#x}: {}", patch.address(), e);
            }
        }
    }

    fn main_module<M>(&self, memory: &M) -> Option<ModuleInfo>
    where
        M: ModuleQuery + ?Sized,
    {
        let module = memory.main_module();
        if module.is_none() {
            error!("Could not find the game executable");
        }
        module
    }

    fn record(&mut self, report: SiteReport) {
        match report.status {
            SiteStatus::Patched => info!("{}: patched {} site(s)", report.name, report.patched.len()),
            SiteStatus::PartiallyPatched => warn!(
                "{}: patched {} of {} site(s): {}",
                report.name,
                report.patched.len(),
                report.matches,
                report.errors.join("; ")
            ),
            _ => error!("{}: could not find anything to patch", report.name),
        }

        self.reports.retain(|r| r.name != report.name);
        self.reports.push(report);
    }

    fn locate_flag<M>(&mut self, memory: &M, module: &ModuleInfo) -> SiteReport
    where
        M: ProcessMemory + ?Sized,
    {
        let mut report = SiteReport::new(FLAG_SITE);
        report.status = SiteStatus::Scanning;

        let candidates: Vec<PatternSpec> = self
            .overlay
            .patterns_for(FLAG_SITE)
            .iter()
            .chain(&self.profile.flag)
            .cloned()
            .collect();

        for spec in &candidates {
            let Some(operand) = find_spec(memory, module, spec) else {
                continue;
            };
            match AddressResolver::new(memory).calculate_absolute(operand) {
                Ok(flag) => {
                    info!("Integrity flag at {:#x}", flag);
                    self.flag_address = Some(flag);
                    report.matches = 1;
                    report.patched.push(flag);
                    break;
                }
                Err(e) => report.errors.push(format!("{:#x}: {}", operand, e)),
            }
        }

        report.finish();
        report
    }

    /// Rewrite every conditional branch matched by the sweep patterns,
    /// re-scanning from one byte past each match until the module ends.
    fn sweep<M>(&mut self, memory: &M, module: &ModuleInfo) -> SiteReport
    where
        M: ProcessMemory + ?Sized,
    {
        let mut report = SiteReport::new(SWEEP_SITE);
        report.status = SiteStatus::Scanning;

        let candidates: Vec<PatternSpec> = self
            .overlay
            .patterns_for(SWEEP_SITE)
            .iter()
            .chain(&self.profile.sweep)
            .cloned()
            .collect();

        let scanner = Scanner::new(memory);
        for spec in &candidates {
            info!("Scanning for {}", spec.pattern);
            let pattern = match spec.compile() {
                Ok(p) => p,
                Err(e) => {
                    error!("Skipping pattern {:?}: {}", spec.pattern, e);
                    continue;
                }
            };

            for found in scanner.scan_all(module.base, module.size as usize, &pattern) {
                let site = found + spec.offset as u64;
                if self.already_patched.contains(&site) {
                    info!("Branch at {:#x} already patched, continuing", site);
                    continue;
                }
                report.matches += 1;

                match create_patch(memory, site, &SiteAction::ForceJump, false) {
                    Ok(mut patch) => {
                        if self.enabled {
                            if let Err(e) = patch.toggle(memory, true) {
                                report.errors.push(format!("{:#x}: {}", site, e));
                            }
                        }
                        self.already_patched.insert(site);
                        report.patched.push(site);
                        self.patches.push(patch);
                    }
                    Err(e) => report.errors.push(format!("{:#x}: {}", site, e)),
                }
            }
        }

        report.finish();
        report
    }

    fn patch_site<M>(&mut self, memory: &M, module: &ModuleInfo, site: &CheckSite) -> SiteReport
    where
        M: ProcessMemory + ?Sized,
    {
        let mut report = SiteReport::new(&site.name);
        report.status = SiteStatus::Scanning;

        let mut locators: Vec<Locator> = Vec::new();
        if let Some(first) = site.locators.first() {
            locators.extend(
                self.overlay
                    .patterns_for(&site.name)
                    .iter()
                    .map(|spec| first.with_pattern(spec.clone())),
            );
        }
        locators.extend(site.locators.iter().cloned());

        for (index, locator) in locators.iter().enumerate() {
            let Some(address) = locate(memory, module, locator) else {
                debug!("{}: candidate {} found nothing", site.name, index);
                continue;
            };
            report.matches = 1;

            if !self.already_patched.insert(address) {
                info!("{}: {:#x} already patched", site.name, address);
                report.patched.push(address);
                break;
            }

            match create_patch(memory, address, &site.action, true) {
                Ok(patch) => {
                    report.patched.push(address);
                    self.patches.push(patch);
                }
                Err(e) => {
                    self.already_patched.remove(&address);
                    report.errors.push(format!("{:#x}: {}", address, e));
                }
            }
            break;
        }

        report.finish();
        report
    }

    fn patch_method<M, R>(&mut self, memory: &M, runtime: &R, method: &MethodPatch) -> SiteReport
    where
        M: ProcessMemory + ?Sized,
        R: Runtime + ?Sized,
    {
        let mut report = SiteReport::new(&method.name());
        report.status = SiteStatus::Scanning;

        let Some(target) = resolve_method(memory, runtime, method) else {
            report.finish();
            return report;
        };
        report.matches = 1;

        let action = SiteAction::Write(to_patch_bytes(RETURN_FALSE));
        match create_patch(memory, target, &action, true) {
            Ok(patch) => {
                report.patched.push(target);
                self.patches.push(patch);
            }
            Err(e) => report.errors.push(format!("{:#x}: {}", target, e)),
        }

        report.finish();
        report
    }
}

fn resolve_method<M, R>(memory: &M, runtime: &R, method: &MethodPatch) -> Option<u64>
where
    M: ProcessMemory + ?Sized,
    R: Runtime + ?Sized,
{
    let Some(ty) = runtime.find_type(method.type_hash) else {
        error!("Could not find type {:#x}", method.type_hash);
        return None;
    };
    let Some(info) = runtime.find_method_by_hash(ty, method.method_hash) else {
        error!("Could not find method {:#x}", method.method_hash);
        return None;
    };
    let Some(entry) = info.entry else {
        error!("Method {} has no native entry", info.name);
        return None;
    };

    if !method.through_call {
        return Some(entry);
    }

    let resolver = AddressResolver::new(memory);
    let Some(call) = resolver.scan_opcode(entry, METHOD_CALL_SEARCH, CALL_OPCODE) else {
        error!("No call found in {} at {:#x}", info.name, entry);
        return None;
    };
    match resolver.calculate_absolute(call + 1) {
        Ok(target) => Some(target),
        Err(e) => {
            error!("Could not resolve call at {:#x}: {}", call, e);
            None
        }
    }
}

/// `match + offset` for the first match of `spec` in the module.
fn find_spec<M>(memory: &M, module: &ModuleInfo, spec: &PatternSpec) -> Option<u64>
where
    M: ProcessMemory + ?Sized,
{
    let pattern = match spec.compile() {
        Ok(p) => p,
        Err(e) => {
            error!("Skipping pattern {:?}: {}", spec.pattern, e);
            return None;
        }
    };
    Scanner::new(memory)
        .scan_module(module, &pattern)
        .map(|found| found + spec.offset as u64)
}

fn locate<M>(memory: &M, module: &ModuleInfo, locator: &Locator) -> Option<u64>
where
    M: ProcessMemory + ?Sized,
{
    let resolver = AddressResolver::new(memory);

    match locator {
        Locator::Pattern(spec) => find_spec(memory, module, spec),
        Locator::FunctionOf(spec) => {
            let inside = find_spec(memory, module, spec)?;
            resolver.find_function_start(inside)
        }
        Locator::CallTarget(spec) => {
            let operand = find_spec(memory, module, spec)?;
            resolver.calculate_absolute(operand).ok()
        }
        Locator::ConstantUsers(value) => find_constant_user(memory, module, *value),
        Locator::ReverseFrom {
            anchor,
            window,
            pattern,
        } => {
            let anchor = find_spec(memory, module, anchor)?;
            let compiled = pattern.compile().ok()?;
            Scanner::new(memory)
                .scan_reverse(anchor, *window, &compiled)
                .map(|found| found + pattern.offset as u64)
        }
        Locator::BranchBehind(spec) => {
            let anchor = find_spec(memory, module, spec)?;
            let behind = resolver.get_disassembly_behind(anchor);
            debug!("{} instruction(s) behind {:#x}", behind.len(), anchor);
            behind
                .iter()
                .find(|i| i.is_branch && i.is_conditional)
                .map(|i| i.address)
        }
    }
}

/// Start of the first function with an instruction using `value`. Hits that
/// do not decode, or sit in code without a recognizable prologue, are skipped.
fn find_constant_user<M>(memory: &M, module: &ModuleInfo, value: u32) -> Option<u64>
where
    M: ProcessMemory + ?Sized,
{
    let scanner = Scanner::new(memory);
    let resolver = AddressResolver::new(memory);
    let needle = value.to_le_bytes();
    let end = module.end().saturating_sub(CONSTANT_SCAN_TAIL);

    let mut cursor = module.base;
    while cursor < end {
        let hit = scanner.scan_data(cursor, (end - cursor) as usize, &needle)?;
        cursor = hit + 1;

        let Some(instruction) = resolver.resolve_instruction_containing(hit) else {
            continue;
        };
        match resolver.find_function_start(instruction.address) {
            Some(start) => return Some(start),
            None => error!("Could not find function start for constant use at {:#x}", hit),
        }
    }

    None
}

fn create_patch<M>(memory: &M, address: u64, action: &SiteAction, immediate: bool) -> Result<Patch>
where
    M: ProcessMemory + ?Sized,
{
    let bytes = match action {
        SiteAction::Write(bytes) => bytes.clone(),
        SiteAction::ForceJump => {
            let instruction = AddressResolver::new(memory).require_instruction(address)?;
            let jump = jcc_to_jmp(&instruction).ok_or_else(|| {
                Error::not_found(format!(
                    "conditional branch at {:#x} (found `{}`)",
                    address, instruction.text
                ))
            })?;
            to_patch_bytes(&jump)
        }
    };
    Patch::create(memory, address, bytes, immediate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Protection, SnapshotMemory};
    use crate::runtime::MethodInfo;
    use crate::runtime::fake::FakeRuntime;
    use crate::scan::SitePatterns;

    const BASE: u64 = 0x140000000;

    fn image(size: usize) -> Vec<u8> {
        vec![0xCCu8; size]
    }

    fn put(image: &mut [u8], at: usize, bytes: &[u8]) {
        image[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn ja(rel: i32) -> Vec<u8> {
        let mut out = vec![0x29, 0xC8, 0x0F, 0x87];
        out.extend_from_slice(&rel.to_le_bytes());
        out.extend_from_slice(&[0x8B, 0x84]);
        out
    }

    fn game(image: Vec<u8>) -> SnapshotMemory {
        SnapshotMemory::from_image("game.exe", BASE, image)
    }

    #[test]
    fn test_sweep_patches_every_match_once() {
        let mut bytes = image(0x1000);
        put(&mut bytes, 0x100, &ja(0x40));
        put(&mut bytes, 0x800, &ja(-0x20));
        let memory = game(bytes);

        let mut bypass = IntegrityBypass::new(VariantProfile::for_variant(TargetVariant::Re8), true);
        let runtime = FakeRuntime::default();
        bypass.initialize(&memory, &runtime);

        let report = bypass.report();
        let sweep = report.site(SWEEP_SITE).unwrap();
        assert_eq!(sweep.status, SiteStatus::Patched);
        assert_eq!(sweep.patched, vec![BASE + 0x102, BASE + 0x802]);

        let mut expected = vec![0xE9];
        expected.extend_from_slice(&0x41i32.to_le_bytes());
        expected.push(0x90);
        assert_eq!(memory.read_bytes(BASE + 0x102, 6).unwrap(), expected);

        assert_eq!(
            *runtime.ignored.lock().unwrap(),
            CHECKSUM_ENTRY_HASHES.to_vec()
        );
        assert_eq!(
            memory.query_protection(BASE + 0x102).unwrap(),
            Protection::EXECUTE_READ
        );
    }

    #[test]
    fn test_sweep_dedups_overlapping_patterns() {
        // Matches both "29 c8 0f 87 .. 8b 84" (offset 2) and
        // "8b 84 .. 29 c8 0f 87" (offset 9) at the same ja.
        let mut bytes = image(0x1000);
        put(&mut bytes, 0x200, &[0x8B, 0x84, 0x24, 0x10, 0x00, 0x00, 0x00]);
        put(&mut bytes, 0x207, &ja(0x10));
        let memory = game(bytes);

        // Disabled, so the first rewrite does not hide the second match.
        let mut bypass = IntegrityBypass::new(VariantProfile::for_variant(TargetVariant::Re8), false);
        bypass.initialize(&memory, &FakeRuntime::default());

        assert_eq!(bypass.patches().len(), 1);
        assert_eq!(bypass.patches()[0].address(), BASE + 0x209);
    }

    #[test]
    fn test_disabled_sweep_waits_for_tick() {
        let mut bytes = image(0x1000);
        put(&mut bytes, 0x100, &ja(0x40));
        let memory = game(bytes);
        let runtime = FakeRuntime::default();

        let mut bypass = IntegrityBypass::new(VariantProfile::for_variant(TargetVariant::Re8), false);
        bypass.initialize(&memory, &runtime);
        assert_eq!(memory.read_u8(BASE + 0x102).unwrap(), 0x0F);

        bypass.set_enabled(true);
        bypass.tick(&memory, &runtime);
        assert_eq!(memory.read_u8(BASE + 0x102).unwrap(), 0xE9);

        bypass.set_enabled(false);
        bypass.tick(&memory, &runtime);
        assert_eq!(memory.read_u8(BASE + 0x102).unwrap(), 0x0F);
    }

    #[test]
    fn test_flag_located_and_forced_every_tick() {
        let mut bytes = image(0x2000);
        // cmp qword ptr [rax+18h], 0; cmovz ecx, r15d; mov [rip+disp], cl
        put(&mut bytes, 0x300, &[0x48, 0x83, 0x78, 0x18, 0x00, 0x41, 0x0F, 0x44, 0xCF, 0x88, 0x0D]);
        put(&mut bytes, 0x30B, &0x1000i32.to_le_bytes());
        let memory = SnapshotMemory::builder()
            .module("re3.exe", BASE, bytes, Protection::EXECUTE_READ)
            .region(BASE + 0x130F, vec![0u8; 0x10], Protection::READWRITE)
            .build();
        let runtime = FakeRuntime::default();

        let mut bypass = IntegrityBypass::new(VariantProfile::for_variant(TargetVariant::Re3), true);
        bypass.initialize(&memory, &runtime);
        assert_eq!(bypass.flag_address(), Some(BASE + 0x30F + 0x1000));

        bypass.tick(&memory, &runtime);
        assert_eq!(memory.read_u8(BASE + 0x130F).unwrap(), 1);

        memory.poke(BASE + 0x130F, &[0]).unwrap();
        bypass.tick(&memory, &runtime);
        assert_eq!(memory.read_u8(BASE + 0x130F).unwrap(), 1);
    }

    #[test]
    fn test_missing_sites_are_reported_not_fatal() {
        let memory = game(image(0x1000));
        let mut bypass = IntegrityBypass::new(VariantProfile::for_variant(TargetVariant::Dd2), true);
        bypass.run_startup_patches(&memory);

        let report = bypass.report();
        assert_eq!(report.sites.len(), 4);
        assert!(report.sites.iter().all(|s| s.status == SiteStatus::NotFound));
        assert!(bypass.patches().is_empty());
    }

    #[test]
    fn test_reverse_scan_fallback() {
        let mut bytes = image(0x1000);
        put(&mut bytes, 0x400, &[0x75, 0x06, 0x50, 0xF7, 0xD0]);
        put(&mut bytes, 0x480, &[0x88, 0x85, 0x92, 0x01, 0x00, 0x00]);
        let memory = game(bytes);

        let mut bypass = IntegrityBypass::new(VariantProfile::for_variant(TargetVariant::Re4), true);
        bypass.run_startup_patches(&memory);

        let report = bypass.report();
        assert_eq!(
            report.site("memory_scan_crash").unwrap().patched,
            vec![BASE + 0x400]
        );
        assert_eq!(memory.read_bytes(BASE + 0x400, 2).unwrap(), vec![0xEB, 0x06]);
    }

    #[test]
    fn test_branch_behind_fallback() {
        let mut bytes = image(0x1000);
        // test eax, eax; jz +6; mov eax, 1; nop; <anchor>
        put(&mut bytes, 0x470, &[0x85, 0xC0, 0x74, 0x06, 0xB8, 0x01, 0x00, 0x00, 0x00, 0x90]);
        put(&mut bytes, 0x47A, &[0x88, 0x85, 0x92, 0x01, 0x00, 0x00]);
        let memory = game(bytes);

        let mut bypass = IntegrityBypass::new(VariantProfile::for_variant(TargetVariant::Re4), true);
        bypass.run_startup_patches(&memory);

        assert_eq!(memory.read_bytes(BASE + 0x472, 2).unwrap(), vec![0xEB, 0x06]);
        assert_eq!(
            bypass.report().site("memory_scan_crash").unwrap().status,
            SiteStatus::Patched
        );
    }

    #[test]
    fn test_natives_marker_keeps_high_byte() {
        let mut bytes = image(0x1000);
        let marker: Vec<u8> = "\0/natives/\0"
            .encode_utf16()
            .flat_map(|c| c.to_le_bytes())
            .collect();
        put(&mut bytes, 0x600, &marker);
        let memory = SnapshotMemory::builder()
            .module("dd2.exe", BASE, bytes, Protection::READONLY)
            .build();

        let mut bypass = IntegrityBypass::new(VariantProfile::for_variant(TargetVariant::Dd2), true);
        bypass.run_startup_patches(&memory);

        assert_eq!(memory.read_bytes(BASE + 0x602, 4).unwrap(), vec![b'?', 0x00, b'n', 0x00]);
        assert_eq!(memory.query_protection(BASE + 0x602).unwrap(), Protection::READONLY);
    }

    #[test]
    fn test_overlay_pattern_tried_first() {
        let mut bytes = image(0x1000);
        // A stack destroyer that the builtin pattern no longer matches.
        put(&mut bytes, 0x500, &[0x48, 0x89, 0x11, 0x48, 0x81, 0xC4, 0x30, 0x01, 0x00, 0x00]);
        let memory = game(bytes);

        let overlay = PatternSet {
            version: String::new(),
            sites: vec![SitePatterns {
                name: "stack_destroyer".to_string(),
                patterns: vec![PatternSpec::new("48 89 11 48 81 C4 ? 01 00 00", 0)],
            }],
        };
        let mut bypass = IntegrityBypass::new(VariantProfile::for_variant(TargetVariant::Sf6), true)
            .with_overlay(overlay);
        bypass.run_startup_patches(&memory);

        assert_eq!(memory.read_u8(BASE + 0x500).unwrap(), 0xC3);
    }

    #[test]
    fn test_method_patches() {
        let mut bytes = image(0x2000);
        // first method entry
        put(&mut bytes, 0x100, &[0x48, 0x83, 0xEC, 0x28]);
        // second method: mov rcx, rbx; call +0x500
        put(&mut bytes, 0x200, &[0x48, 0x89, 0xD9, 0xE8]);
        put(&mut bytes, 0x204, &0x500i32.to_le_bytes());
        let memory = game(bytes);

        let mut runtime = FakeRuntime::default();
        runtime.types.insert(0x83f09f47, 1);
        runtime.types.insert(0xce04a0c6, 2);
        runtime.methods.insert(
            1,
            vec![MethodInfo {
                name: "cool".to_string(),
                hash: 0x21c27632fa7ba29b,
                entry: Some(BASE + 0x100),
            }],
        );
        runtime.methods.insert(
            2,
            vec![MethodInfo {
                name: "awesome".to_string(),
                hash: 0x9f79221341cfcb18,
                entry: Some(BASE + 0x200),
            }],
        );

        let mut bypass = IntegrityBypass::new(VariantProfile::for_variant(TargetVariant::MhRise), true);
        bypass.initialize(&memory, &runtime);

        assert_eq!(memory.read_bytes(BASE + 0x100, 3).unwrap(), RETURN_FALSE.to_vec());
        assert_eq!(memory.read_bytes(BASE + 0x708, 3).unwrap(), RETURN_FALSE.to_vec());

        let report = bypass.report();
        let missing = MethodPatch::entry(0x83f09f47, 0x49b943a462e8cf6a).name();
        assert_eq!(report.site(&missing).unwrap().status, SiteStatus::NotFound);
        assert_eq!(report.patched_count(), 2);
    }

    #[test]
    fn test_timers_only_when_enabled() {
        let memory = game(image(0x1000));
        let runtime = FakeRuntime::default().with_manager(
            "app.EnemyManager",
            0x5000,
            0x10,
            &[("UpdateTimerEnable", 1, true)],
        );

        let mut bypass = IntegrityBypass::new(VariantProfile::for_variant(TargetVariant::Re8), false);
        bypass.tick(&memory, &runtime);
        assert_eq!(runtime.value(0x5000, 1), Some(1));

        bypass.set_enabled(true);
        bypass.tick(&memory, &runtime);
        assert_eq!(runtime.value(0x5000, 1), Some(0));
    }
}
