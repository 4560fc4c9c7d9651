//! Instruction scheduling of HIR methods.
//!
//! Every schedulable basic block is turned into a [`SchedulingGraph`] of
//! dependencies, then list-scheduled bottom up by a [`SchedulingNodeSelector`]
//! using the instruction costs of a target [`SchedulingLatencyVisitor`].

use std::fmt::{self, Display};
use std::path::PathBuf;
use std::str::FromStr;

use hir::Graph;
use thiserror::Error;

mod graph;
mod latency;
mod node;
mod scheduler;
mod selector;

cfg_if::cfg_if! {
    if #[cfg(feature = "arm64")] {
        mod latency_arm64;
        pub use latency_arm64::SchedulingLatencyVisitorArm64;
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "arm")] {
        mod latency_arm;
        pub use latency_arm::{ArmFeatures, SchedulingLatencyVisitorArm};
    }
}

pub use graph::SchedulingGraph;
pub use latency::{NodeLatency, SchedulingLatencyVisitor};
pub use node::{NodeId, SchedulingNode};
pub use scheduler::{BlockSchedule, HScheduler};
pub use selector::{
    CriticalPathSchedulingNodeSelector, RandomSchedulingNodeSelector, SchedulingNodeSelector,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{isa} latency model has no cost for `{instruction}`")]
    UnsupportedInstruction {
        isa: &'static str,
        instruction: String,
    },
    #[error("unknown instruction set `{0}`")]
    UnknownInstructionSet(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionSet {
    Arm,
    Thumb2,
    Arm64,
    X86,
    X86_64,
    Mips,
    Mips64,
}

impl InstructionSet {
    pub fn name(self) -> &'static str {
        match self {
            InstructionSet::Arm => "arm",
            InstructionSet::Thumb2 => "thumb2",
            InstructionSet::Arm64 => "arm64",
            InstructionSet::X86 => "x86",
            InstructionSet::X86_64 => "x86_64",
            InstructionSet::Mips => "mips",
            InstructionSet::Mips64 => "mips64",
        }
    }
}

impl FromStr for InstructionSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let isa = match s.to_ascii_lowercase().as_str() {
            "arm" => InstructionSet::Arm,
            "thumb2" => InstructionSet::Thumb2,
            "arm64" | "aarch64" => InstructionSet::Arm64,
            "x86" => InstructionSet::X86,
            "x86_64" | "x86-64" => InstructionSet::X86_64,
            "mips" => InstructionSet::Mips,
            "mips64" => InstructionSet::Mips64,
            _ => return Err(Error::UnknownInstructionSet(s.to_string())),
        };
        Ok(isa)
    }
}

impl Display for InstructionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone)]
pub struct SchedulingOptions {
    pub only_optimize_loop_blocks: bool,
    pub schedule_randomly: bool,
    pub random_seed: Option<u64>,
    pub dump_dot_graphs: Option<PathBuf>,
    #[cfg(feature = "arm")]
    pub arm_features: ArmFeatures,
}

impl Default for SchedulingOptions {
    fn default() -> Self {
        Self {
            only_optimize_loop_blocks: true,
            schedule_randomly: false,
            random_seed: None,
            dump_dot_graphs: None,
            #[cfg(feature = "arm")]
            arm_features: ArmFeatures::default(),
        }
    }
}

pub struct HInstructionScheduling<'g> {
    graph: &'g mut Graph,
    instruction_set: InstructionSet,
}

impl<'g> HInstructionScheduling<'g> {
    pub fn new(graph: &'g mut Graph, instruction_set: InstructionSet) -> Self {
        Self {
            graph,
            instruction_set,
        }
    }

    /// Returns the blocks that were scheduled. Targets without a latency
    /// model are left untouched.
    pub fn run(&mut self, options: &SchedulingOptions) -> Result<Vec<BlockSchedule>, Error> {
        let mut random_selector;
        let mut critical_path_selector;
        let selector: &mut dyn SchedulingNodeSelector = if options.schedule_randomly {
            random_selector = options.random_seed.map_or_else(
                RandomSchedulingNodeSelector::new,
                RandomSchedulingNodeSelector::with_seed,
            );
            &mut random_selector
        } else {
            critical_path_selector = CriticalPathSchedulingNodeSelector::new();
            &mut critical_path_selector
        };

        match self.instruction_set {
            #[cfg(feature = "arm64")]
            InstructionSet::Arm64 => {
                let visitor = SchedulingLatencyVisitorArm64;
                self.schedule_with(&visitor, selector, options)
            }
            #[cfg(feature = "arm")]
            InstructionSet::Arm | InstructionSet::Thumb2 => {
                let visitor = SchedulingLatencyVisitorArm::new(options.arm_features);
                self.schedule_with(&visitor, selector, options)
            }
            isa => {
                log::trace!("{}: no scheduler for {isa}", self.graph.name());
                Ok(Vec::new())
            }
        }
    }

    fn schedule_with(
        &mut self,
        visitor: &dyn SchedulingLatencyVisitor,
        selector: &mut dyn SchedulingNodeSelector,
        options: &SchedulingOptions,
    ) -> Result<Vec<BlockSchedule>, Error> {
        let mut scheduler = HScheduler::new(visitor, selector);
        scheduler.set_only_optimize_loop_blocks(options.only_optimize_loop_blocks);
        scheduler.set_dot_output(options.dump_dot_graphs.clone());
        scheduler.schedule(self.graph)
    }
}

#[cfg(all(test, feature = "arm", feature = "arm64"))]
mod tests {
    use hir_interp::{Interpreter, Outcome, Value};

    use super::*;

    const COMPUTE: &str = r#"
method Main.compute {
  B0 -> B1 {
    i0: IntConstant<0>
    f1: FloatConstant<10.0>
    i2: IntConstant<1>
    i3: IntConstant<10>
    f4: FloatConstant<1.0>
    v5: Goto
  }
  B1 -> B3, B2 {
    i6: Phi [i0, i20]
    f7: Phi [f1, f18]
    i8: Phi [i2, i21]
    z9: GreaterThanOrEqual [i8, i3]
    v10: If [z9]
  }
  B2 -> B1 {
    v11: SuspendCheck
    f12: Add [f7, f4]
    i13: Shr [i6, i8]
    i14: Mul [i6, i8]
    i15: Add [i6, i13]
    i16: Sub [i15, i14]
    f17: TypeConversion [i8]
    f18: Div [f12, f17]
    i19: TypeConversion [f18]
    i20: Add [i16, i19]
    i21: Add [i8, i2]
    v22: Goto
  }
  B3 {
    v23: Return [i6]
  }
}
"#;

    fn schedule_and_run(isa: InstructionSet, options: &SchedulingOptions) -> (Outcome, usize) {
        let mut module = hir_parser::parse(COMPUTE).unwrap();
        let report = HInstructionScheduling::new(&mut module.methods[0], isa)
            .run(options)
            .unwrap();
        let outcome = Interpreter::new(&module).run("Main.compute", &[]).unwrap();
        (outcome, report.len())
    }

    #[test]
    fn test_random_schedules_preserve_semantics() {
        let options = SchedulingOptions {
            schedule_randomly: true,
            ..Default::default()
        };
        for _ in 0..10 {
            let (outcome, blocks) = schedule_and_run(InstructionSet::Arm64, &options);
            assert_eq!(outcome, Outcome::Return(Value::Int(138774)));
            assert_eq!(blocks, 2);
        }
    }

    #[test]
    fn test_critical_path_schedules_preserve_semantics() {
        for isa in [InstructionSet::Arm64, InstructionSet::Arm, InstructionSet::Thumb2] {
            let (outcome, _) = schedule_and_run(isa, &SchedulingOptions::default());
            assert_eq!(outcome, Outcome::Return(Value::Int(138774)));
        }
    }

    #[test]
    fn test_all_blocks() {
        let options = SchedulingOptions {
            only_optimize_loop_blocks: false,
            schedule_randomly: true,
            random_seed: Some(3),
            ..Default::default()
        };
        let (outcome, blocks) = schedule_and_run(InstructionSet::Arm, &options);
        assert_eq!(outcome, Outcome::Return(Value::Int(138774)));
        // the return block has a single instruction
        assert_eq!(blocks, 3);
    }

    #[test]
    fn test_other_targets_do_nothing() {
        let mut graph = hir_parser::parse_method(COMPUTE).unwrap();
        let before = graph.to_string();
        for isa in [InstructionSet::X86, InstructionSet::X86_64, InstructionSet::Mips64] {
            let report = HInstructionScheduling::new(&mut graph, isa)
                .run(&SchedulingOptions::default())
                .unwrap();
            assert!(report.is_empty());
        }
        assert_eq!(graph.to_string(), before);
    }

    #[test]
    fn test_unsupported_instruction_aborts() {
        let mut graph = hir_parser::parse_method(
            r#"
method m {
  B0 -> B1 {
    s0: ParameterValue<0>
    v1: Goto
  }
  B1 -> B2, B1 {
    s2: Ror [s0, s0]
    z3: Equal [s2, s0]
    v4: If [z3]
  }
  B2 {
    v5: ReturnVoid
  }
}
"#,
        )
        .unwrap();
        let result =
            HInstructionScheduling::new(&mut graph, InstructionSet::Arm).run(&Default::default());
        assert!(matches!(
            result,
            Err(Error::UnsupportedInstruction { isa: "arm", .. })
        ));
    }

    #[test]
    fn test_instruction_set_names() {
        for isa in [
            InstructionSet::Arm,
            InstructionSet::Thumb2,
            InstructionSet::Arm64,
            InstructionSet::X86,
            InstructionSet::X86_64,
            InstructionSet::Mips,
            InstructionSet::Mips64,
        ] {
            assert_eq!(isa.to_string().parse::<InstructionSet>().unwrap(), isa);
        }
        assert_eq!("AArch64".parse::<InstructionSet>().unwrap(), InstructionSet::Arm64);
        assert!(matches!(
            "riscv64".parse::<InstructionSet>(),
            Err(Error::UnknownInstructionSet(_))
        ));
    }
}
