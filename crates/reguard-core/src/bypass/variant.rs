//! Per-game strategy tables.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::site::{CheckSite, Locator, MethodPatch, SiteAction};
use crate::patch::{RETURN, RETURN_FALSE, SKIP, to_patch_bytes};
use crate::scan::PatternSpec;

/// Site name used for user-supplied flag patterns.
pub const FLAG_SITE: &str = "integrity_flag";

/// Site name used for user-supplied branch sweep patterns.
pub const SWEEP_SITE: &str = "checksum_branches";

/// Per-frame application entries that run the checksum callbacks.
pub const CHECKSUM_ENTRY_HASHES: [u64; 2] = [0x76b8100bec7c12c3, 0x9f63c0fc4eea6626];

/// Managers whose update timers get switched off when the checks trip.
pub const TIMER_MANAGERS: [&str; 5] = [
    "app.InteractManager",
    "app.EnemyManager",
    "app.GUIManager",
    "app.HIDManager",
    "app.FadeManager",
];

/// Operand of the `sub rax, imm32` found in the first checksum callback.
pub const CHECKSUM_CALLBACK_CONSTANT: u32 = 0x0128_E329;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum TargetVariant {
    /// Only the syscall guardian, no game-specific patches.
    #[default]
    Generic,
    Re3,
    Re8,
    MhRise,
    Sf6,
    Re4,
    Dd2,
}

#[derive(Debug, Clone)]
pub struct VariantProfile {
    pub variant: TargetVariant,
    /// Candidates for the instruction that stores the "checks bypassed" flag.
    pub flag: Vec<PatternSpec>,
    /// Conditional branches around checksum blocks, all rewritten to jumps.
    pub sweep: Vec<PatternSpec>,
    pub ignored_entries: Vec<u64>,
    pub timer_managers: Vec<&'static str>,
    /// Patched at startup, before the runtime is usable.
    pub startup: Vec<CheckSite>,
    /// Patched through reflection once the runtime is up.
    pub methods: Vec<MethodPatch>,
    /// Refuse vectored exception handler registrations from the game.
    pub guard_exception_handlers: bool,
}

impl VariantProfile {
    pub fn for_variant(variant: TargetVariant) -> Self {
        let mut profile = Self {
            variant,
            flag: Vec::new(),
            sweep: Vec::new(),
            ignored_entries: Vec::new(),
            timer_managers: Vec::new(),
            startup: Vec::new(),
            methods: Vec::new(),
            guard_exception_handlers: false,
        };

        match variant {
            TargetVariant::Generic => {}
            TargetVariant::Re3 => {
                profile.flag = vec![
                    // cmp qword ptr [rax+18h], 0; cmovz ecx, r15d; mov cs:flag, cl
                    PatternSpec::new("48 ? ? 18 00 41 ? ? ? 88 0D ? ? ? ?", 11),
                    PatternSpec::new("48 ? ? 18 00 0F ? ? 88 0D ? ? ? ? 49 ? ? ? 48", 10),
                ];
            }
            TargetVariant::Re8 => {
                profile.sweep = vec![
                    // sub eax, ecx; ja skip; mov eax, [rsp+x]
                    PatternSpec::new("29 c8 0f 87 ? ? ? ? 8b 84", 2),
                    // sub eax, ecx; ja skip; xor eax, eax; sub eax, [rsp+x]
                    PatternSpec::new("29 c8 0f 87 ? ? ? ? 31 C0 2B", 2),
                    // mov eax, [rsp+x]; sub eax, ecx; ja skip
                    PatternSpec::new("8b 84 ? ? ? ? ? 29 c8 0f 87 ? ? ? ?", 9),
                ];
                profile.ignored_entries = CHECKSUM_ENTRY_HASHES.to_vec();
                profile.timer_managers = TIMER_MANAGERS.to_vec();
                profile.startup = callback_sites();
            }
            TargetVariant::MhRise => {
                profile.startup = callback_sites();
                profile.methods = vec![
                    MethodPatch::entry(0x83f09f47, 0x21c27632fa7ba29b),
                    MethodPatch::entry(0x83f09f47, 0x49b943a462e8cf6a),
                    MethodPatch::first_call(0xce04a0c6, 0x9f79221341cfcb18),
                ];
            }
            TargetVariant::Sf6 => {
                // The callback patches break replays and chat here.
                profile.startup = vec![stack_destroyer_site()];
                profile.guard_exception_handlers = true;
            }
            TargetVariant::Re4 => {
                profile.startup = vec![memory_scan_crash_site(), stack_destroyer_site()];
                profile.guard_exception_handlers = true;
            }
            TargetVariant::Dd2 => {
                profile.startup = dd2_sites();
                profile.startup.push(stack_destroyer_site());
                profile.guard_exception_handlers = true;
            }
        }

        profile
    }
}

/// Checksum callbacks that run on the very first frame and so must be
/// patched by scanning alone.
fn callback_sites() -> Vec<CheckSite> {
    vec![
        CheckSite::new(
            "checksum_callback",
            vec![Locator::ConstantUsers(CHECKSUM_CALLBACK_CONSTANT)],
            SiteAction::Write(to_patch_bytes(RETURN)),
        ),
        // call TripResult; cmp eax, 1F2h; jz ...; lea rcx, Context; call TripResult
        CheckSite::new(
            "trip_result_callback",
            vec![Locator::FunctionOf(PatternSpec::new(
                "E8 ? ? ? ? 3D F2 01 00 00 0F 84 ? ? ? ? 48 8D 0D ? ? ? ? E8",
                0,
            ))],
            SiteAction::Write(to_patch_bytes(RETURN)),
        ),
        // Embedded checks that alter startup flow (DLC loading) when they
        // return 1. They are called with different indices.
        CheckSite::new(
            "embedded_check",
            vec![
                Locator::CallTarget(PatternSpec::new(
                    "8D ? 02 E8 ? ? ? ? 0F B6 C8 48 ? ? 50 48 ? ? 18 0F",
                    4,
                )),
                Locator::CallTarget(PatternSpec::new(
                    "8D ? 05 E8 ? ? ? ? 0F B6 C8 48 ? ? 50 48 ? ? 18 0F",
                    4,
                )),
            ],
            SiteAction::Write(to_patch_bytes(RETURN_FALSE)),
        ),
        CheckSite::new(
            "embedded_check_indexed",
            vec![Locator::CallTarget(PatternSpec::new(
                "72 ? 41 8B ? E8 ? ? ? ? 0F B6 C8 48 ? ? 50 48 ? ? 18 0F",
                6,
            ))],
            SiteAction::Write(to_patch_bytes(RETURN_FALSE)),
        ),
    ]
}

/// The per-frame memory scans jump into VM cleanup and corrupt memory when
/// they detect a change; the branch is forced so the crash never happens.
fn memory_scan_crash_site() -> CheckSite {
    CheckSite::new(
        "memory_scan_crash",
        vec![
            Locator::Pattern(PatternSpec::new("48 8B 8D D0 03 00 00 48 29 C1 75 ?", 10)),
            // mov [rbp+192h], al is used right after the branch and nowhere else.
            Locator::ReverseFrom {
                anchor: PatternSpec::new("88 85 92 01 00 00", 0),
                window: 0x100,
                pattern: PatternSpec::new("75 ? 50 F7 D0", 0),
            },
            Locator::BranchBehind(PatternSpec::new("88 85 92 01 00 00", 0)),
        ],
        SiteAction::ForceJump,
    )
}

fn dd2_sites() -> Vec<CheckSite> {
    vec![
        CheckSite::new(
            "renderer_corruption",
            vec![Locator::Pattern(PatternSpec::new("41 8B ? ? 78 83 ? 07 ? ? 75 ?", 10))],
            SiteAction::ForceJump,
        ),
        CheckSite::new(
            "renderer_corruption_2",
            vec![Locator::Pattern(PatternSpec::new(
                "49 3B D0 75 ? ? 8B ? ? ? ? ? ? 8B ? ? ? ? ? ? 8B ? ? 8B ? ? ? ? ?",
                3,
            ))],
            SiteAction::ForceJump,
        ),
        // L"/natives/": loose files are rejected when their path contains it,
        // so its leading '/' becomes '?', which no path can contain.
        CheckSite::new(
            "natives_path_marker",
            vec![Locator::Pattern(PatternSpec::new(
                "00 00 2F 00 6E 00 61 00 74 00 69 00 76 00 65 00 73 00 2F 00 00 00",
                2,
            ))],
            SiteAction::Write(vec![b'?' as i16, SKIP]),
        ),
    ]
}

fn stack_destroyer_site() -> CheckSite {
    CheckSite::new(
        "stack_destroyer",
        vec![Locator::Pattern(PatternSpec::new(
            "48 89 11 48 c7 04 24 00 00 00 00 48 81 c4 28 01 00 00",
            0,
        ))],
        SiteAction::Write(to_patch_bytes(RETURN)),
    )
}
