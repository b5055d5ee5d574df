//! Operator types the memory planner treats specially.
//!
//! Everything else is carried as [`OpType::Other`] and planned as an
//! ordinary compute op.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OpType {
    Data,
    AippData,
    AnnData,
    Constant,
    ConstantOp,
    Variable,
    NetOutput,
    MultiShape,
    HcomBroadcast,
    HcomAllReduce,
    Assign,
    AssignAdd,
    AssignSub,
    Proposal,
    ZerosLike,
    FastRcnnPredictions,
    Enter,
    RefEnter,
    NextIteration,
    RefNextIteration,
    Other(String),
}

impl OpType {
    pub fn as_str(&self) -> &str {
        match self {
            OpType::Data => "Data",
            OpType::AippData => "AippData",
            OpType::AnnData => "AnnData",
            OpType::Constant => "Constant",
            OpType::ConstantOp => "Const",
            OpType::Variable => "Variable",
            OpType::NetOutput => "NetOutput",
            OpType::MultiShape => "MultiShape",
            OpType::HcomBroadcast => "HcomBroadcast",
            OpType::HcomAllReduce => "HcomAllReduce",
            OpType::Assign => "Assign",
            OpType::AssignAdd => "AssignAdd",
            OpType::AssignSub => "AssignSub",
            OpType::Proposal => "Proposal",
            OpType::ZerosLike => "ZerosLike",
            OpType::FastRcnnPredictions => "FastrcnnPredictions",
            OpType::Enter => "Enter",
            OpType::RefEnter => "RefEnter",
            OpType::NextIteration => "NextIteration",
            OpType::RefNextIteration => "RefNextIteration",
            OpType::Other(name) => name,
        }
    }

    /// Outputs and workspaces of these ops never get a block; they are
    /// annotated with offset 0.
    pub fn is_zero_memory(&self) -> bool {
        matches!(
            self,
            OpType::Variable
                | OpType::Constant
                | OpType::ConstantOp
                | OpType::MultiShape
                | OpType::HcomBroadcast
                | OpType::HcomAllReduce
                | OpType::Assign
                | OpType::AssignAdd
                | OpType::AssignSub
        )
    }

    /// Slots of these ops always get a fresh block.
    pub fn excludes_reuse(&self) -> bool {
        matches!(
            self,
            OpType::Data
                | OpType::AippData
                | OpType::AnnData
                | OpType::Constant
                | OpType::ConstantOp
                | OpType::NetOutput
                | OpType::Proposal
                | OpType::ZerosLike
        )
    }

    /// Outputs of these ops are parameters, not temporaries: consuming them
    /// never releases the producing block.
    pub fn holds_parameter(&self) -> bool {
        matches!(
            self,
            OpType::Constant | OpType::ConstantOp | OpType::FastRcnnPredictions
        )
    }

    /// A pooled block that ever hosted one of these is not handed out again.
    pub fn is_data_like(&self) -> bool {
        matches!(
            self,
            OpType::Data
                | OpType::AippData
                | OpType::Enter
                | OpType::RefEnter
                | OpType::NextIteration
                | OpType::RefNextIteration
        )
    }

    /// Boundary-sensitive ops may be annotated through several aliasing
    /// paths; their output offsets converge on the smallest one written.
    pub fn keeps_smallest_offset(&self) -> bool {
        matches!(
            self,
            OpType::Data | OpType::AippData | OpType::MultiShape | OpType::NetOutput
        )
    }
}

impl From<&str> for OpType {
    fn from(s: &str) -> Self {
        match s {
            "Data" => OpType::Data,
            "AippData" => OpType::AippData,
            "AnnData" => OpType::AnnData,
            "Constant" => OpType::Constant,
            "Const" => OpType::ConstantOp,
            "Variable" => OpType::Variable,
            "NetOutput" => OpType::NetOutput,
            "MultiShape" => OpType::MultiShape,
            "HcomBroadcast" => OpType::HcomBroadcast,
            "HcomAllReduce" => OpType::HcomAllReduce,
            "Assign" => OpType::Assign,
            "AssignAdd" => OpType::AssignAdd,
            "AssignSub" => OpType::AssignSub,
            "Proposal" => OpType::Proposal,
            "ZerosLike" => OpType::ZerosLike,
            "FastrcnnPredictions" => OpType::FastRcnnPredictions,
            "Enter" => OpType::Enter,
            "RefEnter" => OpType::RefEnter,
            "NextIteration" => OpType::NextIteration,
            "RefNextIteration" => OpType::RefNextIteration,
            other => OpType::Other(other.to_string()),
        }
    }
}

impl From<String> for OpType {
    fn from(s: String) -> Self {
        OpType::from(s.as_str())
    }
}

impl From<OpType> for String {
    fn from(op: OpType) -> Self {
        op.as_str().to_string()
    }
}

impl FromStr for OpType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(OpType::from(s))
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
