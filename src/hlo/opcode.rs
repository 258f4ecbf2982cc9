// src/hlo/opcode.rs

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

macro_rules! hlo_opcodes {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Instruction opcodes understood by the scheduler.
        ///
        /// Names follow the textual HLO spelling (`all-reduce-start`, ...).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum HloOpcode {
            $($variant),+
        }

        impl HloOpcode {
            pub const ALL: &'static [HloOpcode] = &[$(HloOpcode::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(HloOpcode::$variant => $name),+
                }
            }
        }

        impl FromStr for HloOpcode {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($name => Ok(HloOpcode::$variant),)+
                    other => Err(format!("unknown opcode: {other}")),
                }
            }
        }
    };
}

hlo_opcodes! {
    Parameter => "parameter",
    Constant => "constant",
    Add => "add",
    Subtract => "subtract",
    Multiply => "multiply",
    Divide => "divide",
    Negate => "negate",
    Exp => "exponential",
    Tanh => "tanh",
    Maximum => "maximum",
    Compare => "compare",
    Select => "select",
    Broadcast => "broadcast",
    Reshape => "reshape",
    Transpose => "transpose",
    Slice => "slice",
    DynamicSlice => "dynamic-slice",
    DynamicUpdateSlice => "dynamic-update-slice",
    Concatenate => "concatenate",
    Reduce => "reduce",
    Convolution => "convolution",
    Dot => "dot",
    Fusion => "fusion",
    CustomCall => "custom-call",
    Tuple => "tuple",
    GetTupleElement => "get-tuple-element",
    Bitcast => "bitcast",
    Copy => "copy",
    CopyStart => "copy-start",
    CopyDone => "copy-done",
    While => "while",
    Conditional => "conditional",
    Call => "call",
    AllGather => "all-gather",
    AllGatherStart => "all-gather-start",
    AllGatherDone => "all-gather-done",
    AllReduce => "all-reduce",
    AllReduceStart => "all-reduce-start",
    AllReduceDone => "all-reduce-done",
    AllToAll => "all-to-all",
    ReduceScatter => "reduce-scatter",
    CollectivePermute => "collective-permute",
    CollectivePermuteStart => "collective-permute-start",
    CollectivePermuteDone => "collective-permute-done",
    AsyncStart => "async-start",
    AsyncDone => "async-done",
    Send => "send",
    SendDone => "send-done",
    Recv => "recv",
    RecvDone => "recv-done",
}

impl HloOpcode {
    /// Opcodes that begin an asynchronous operation paired with a done.
    pub fn is_async_start(self) -> bool {
        matches!(
            self,
            HloOpcode::AllGatherStart
                | HloOpcode::AllReduceStart
                | HloOpcode::CollectivePermuteStart
                | HloOpcode::AsyncStart
                | HloOpcode::CopyStart
                | HloOpcode::Send
                | HloOpcode::Recv
        )
    }

    /// Opcodes that complete an asynchronous operation.
    pub fn is_async_done(self) -> bool {
        matches!(
            self,
            HloOpcode::AllGatherDone
                | HloOpcode::AllReduceDone
                | HloOpcode::CollectivePermuteDone
                | HloOpcode::AsyncDone
                | HloOpcode::CopyDone
                | HloOpcode::SendDone
                | HloOpcode::RecvDone
        )
    }

    pub fn is_collective(self) -> bool {
        matches!(
            self,
            HloOpcode::AllGather
                | HloOpcode::AllGatherStart
                | HloOpcode::AllGatherDone
                | HloOpcode::AllReduce
                | HloOpcode::AllReduceStart
                | HloOpcode::AllReduceDone
                | HloOpcode::AllToAll
                | HloOpcode::ReduceScatter
                | HloOpcode::CollectivePermute
                | HloOpcode::CollectivePermuteStart
                | HloOpcode::CollectivePermuteDone
        )
    }

    pub fn is_send_recv(self) -> bool {
        matches!(
            self,
            HloOpcode::Send | HloOpcode::SendDone | HloOpcode::Recv | HloOpcode::RecvDone
        )
    }

    /// Ops that forward their operand's buffers instead of producing new ones.
    pub fn is_pass_through(self) -> bool {
        matches!(self, HloOpcode::GetTupleElement | HloOpcode::Bitcast)
    }
}

impl fmt::Display for HloOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HloOpcode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back_to_the_same_opcode() {
        for op in HloOpcode::ALL {
            assert_eq!(op.as_str().parse::<HloOpcode>(), Ok(*op));
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "all-reduce-begin".parse::<HloOpcode>().unwrap_err();
        assert!(err.contains("all-reduce-begin"));
    }

    #[test]
    fn start_and_done_classification() {
        assert!(HloOpcode::AllReduceStart.is_async_start());
        assert!(!HloOpcode::AllReduceStart.is_async_done());
        assert!(HloOpcode::RecvDone.is_async_done());
        assert!(!HloOpcode::Add.is_async_start());
        assert!(HloOpcode::Bitcast.is_pass_through());
    }
}
