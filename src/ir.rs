//! Dalvik method/class intermediate representation.
//!
//! A real DEX codec library hands back methods already disassembled into this
//! shape; parsing the wire format is explicitly out of scope (see spec §1).
//! Opcodes are modeled as a tagged enum rather than raw bytes, per the
//! re-architecture guidance: the engine never needs byte-exact encoding,
//! only the semantics the encoding carries.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Instruction address within a method's code, in code-unit offsets.
pub type CodeAddress = u32;

/// Register index within a method's register file.
pub type RegisterId = u16;

/// One of the twelve Dalvik binary-arithmetic operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum ArithOp {
    Add,
    Sub,
    /// `rsub-int{,/lit8}` only; computes `rhs - lhs`. Never appears in
    /// register/register form in real Dalvik bytecode.
    RSub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::RSub => "rsub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "rem",
            ArithOp::And => "and",
            ArithOp::Or => "or",
            ArithOp::Xor => "xor",
            ArithOp::Shl => "shl",
            ArithOp::Shr => "shr",
            ArithOp::Ushr => "ushr",
        };
        f.write_str(name)
    }
}

/// Operand type of a binary-arithmetic instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum ArithType {
    Int,
    Long,
    Float,
    Double,
}

/// Shape of a binary-arithmetic instruction's operands, per the Dalvik
/// mnemonic suffix (`/2addr`, `/lit8`, `/lit16`, or none).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum ArithForm {
    /// `op vAA, vBB, vCC`
    Wide3,
    /// `op/2addr vA, vB` — destination doubles as the left operand.
    TwoAddr,
    /// `op/lit16 vA, vB, #+CCCC`
    Lit16,
    /// `op/lit8 vAA, vBB, #+CC`
    Lit8,
}

/// Second operand of a binary-arithmetic instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum ArithRhs {
    Register(RegisterId),
    Literal(i32),
}

/// Numeric/object comparison used by `if-test`/`if-testz`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

/// Width/category of a moved value, mirroring Dalvik's three move families.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum MoveCategory {
    Single,
    Wide,
    Object,
}

/// A literal materialized by a `const*` instruction.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum ConstValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Class(String),
}

/// Reference to a field, resolved by the external class manager.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub field_type: String,
}

/// Which invocation form produced an `invoke-*` instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum InvokeKind {
    Virtual,
    Super,
    Direct,
    Static,
    Interface,
}

/// Reference to a method, resolved by the external class manager.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// Fallback shape for any opcode not given precise semantics below.
///
/// The ~250-opcode Dalvik set is covered by this variant for everything
/// except binary arithmetic, new-instance, and the handful of opcodes
/// needed to exercise the optimizer pipeline end to end (§4.1). A
/// `Generic` instruction still carries enough dataflow fact for the
/// conservative interpreter to stay sound: which registers it reads,
/// which it writes (destination width included), and how control flow
/// continues.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct GenericShape {
    pub reads: Vec<RegisterId>,
    pub writes: Vec<RegisterId>,
    pub wide_write: bool,
    pub branch_targets: Vec<CodeAddress>,
    pub falls_through: bool,
}

/// Decoded operand/semantic payload of one instruction.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum InstructionKind {
    Nop,
    Move {
        dest: RegisterId,
        src: RegisterId,
        category: MoveCategory,
    },
    MoveResult {
        dest: RegisterId,
        category: MoveCategory,
    },
    MoveException {
        dest: RegisterId,
    },
    ReturnVoid,
    Return {
        reg: RegisterId,
        category: MoveCategory,
    },
    Const {
        dest: RegisterId,
        value: ConstValue,
        declared_type: String,
    },
    MonitorEnter {
        reg: RegisterId,
    },
    MonitorExit {
        reg: RegisterId,
    },
    CheckCast {
        reg: RegisterId,
        target_type: String,
    },
    InstanceOf {
        dest: RegisterId,
        reg: RegisterId,
        target_type: String,
    },
    ArrayLength {
        dest: RegisterId,
        array: RegisterId,
    },
    NewInstance {
        dest: RegisterId,
        class_type: String,
    },
    NewArray {
        dest: RegisterId,
        size_reg: RegisterId,
        element_type: String,
    },
    FillArrayData {
        array: RegisterId,
    },
    Throw {
        reg: RegisterId,
    },
    Goto {
        target: CodeAddress,
    },
    PackedSwitch {
        reg: RegisterId,
        targets: Vec<CodeAddress>,
        default: CodeAddress,
    },
    SparseSwitch {
        reg: RegisterId,
        targets: Vec<(i32, CodeAddress)>,
        default: CodeAddress,
    },
    IfTest {
        cmp: CmpOp,
        lhs: RegisterId,
        rhs: RegisterId,
        target: CodeAddress,
        fallthrough: CodeAddress,
    },
    IfTestZ {
        cmp: CmpOp,
        reg: RegisterId,
        target: CodeAddress,
        fallthrough: CodeAddress,
    },
    ArrayGet {
        dest: RegisterId,
        array: RegisterId,
        index: RegisterId,
        category: MoveCategory,
    },
    ArrayPut {
        src: RegisterId,
        array: RegisterId,
        index: RegisterId,
        category: MoveCategory,
    },
    InstanceGet {
        dest: RegisterId,
        obj: RegisterId,
        field: FieldRef,
        category: MoveCategory,
    },
    InstancePut {
        src: RegisterId,
        obj: RegisterId,
        field: FieldRef,
        category: MoveCategory,
    },
    StaticGet {
        dest: RegisterId,
        field: FieldRef,
        category: MoveCategory,
    },
    StaticPut {
        src: RegisterId,
        field: FieldRef,
        category: MoveCategory,
    },
    Invoke {
        kind: InvokeKind,
        method: MethodRef,
        args: Vec<RegisterId>,
    },
    BinaryArith {
        op: ArithOp,
        ty: ArithType,
        form: ArithForm,
        dest: RegisterId,
        lhs: RegisterId,
        rhs: ArithRhs,
    },
    Generic(GenericShape),
}

/// One instruction at a specific address in a method's code.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Instruction {
    pub offset: CodeAddress,
    /// Code-unit width of this instruction, used to compute fall-through.
    pub size: u32,
    #[serde(deserialize_with = "deserialize_leaked_str")]
    pub mnemonic: &'static str,
    pub kind: InstructionKind,
}

/// Mnemonics are interned for the process lifetime rather than threaded
/// through as owned `String`s on every instruction; deserializing a class
/// dump is a one-time, whole-process-lifetime cost, so leaking here is
/// equivalent to `Box::leak`-based interning elsewhere in the ecosystem.
fn deserialize_leaked_str<'de, D>(deserializer: D) -> Result<&'static str, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let owned = String::deserialize(deserializer)?;
    Ok(Box::leak(owned.into_boxed_str()))
}

impl Instruction {
    pub fn fallthrough(&self) -> CodeAddress {
        self.offset + self.size
    }

    /// The set of successor addresses reachable directly from this
    /// instruction under concrete Dalvik control-flow semantics (I3).
    pub fn concrete_successors(&self) -> Vec<CodeAddress> {
        match &self.kind {
            InstructionKind::ReturnVoid
            | InstructionKind::Return { .. }
            | InstructionKind::Throw { .. } => Vec::new(),
            InstructionKind::Goto { target } => vec![*target],
            InstructionKind::PackedSwitch {
                targets, default, ..
            } => {
                let mut successors = targets.clone();
                successors.push(self.fallthrough());
                successors.push(*default);
                successors
            }
            InstructionKind::SparseSwitch {
                targets, default, ..
            } => {
                let mut successors: Vec<CodeAddress> =
                    targets.iter().map(|(_, target)| *target).collect();
                successors.push(self.fallthrough());
                successors.push(*default);
                successors
            }
            InstructionKind::IfTest { target, .. } | InstructionKind::IfTestZ { target, .. } => {
                vec![self.fallthrough(), *target]
            }
            InstructionKind::Generic(shape) => {
                let mut successors = shape.branch_targets.clone();
                if shape.falls_through {
                    successors.push(self.fallthrough());
                }
                successors
            }
            _ => vec![self.fallthrough()],
        }
    }
}

/// Exception handler covering a range of addresses in a method.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct ExceptionHandler {
    pub start: CodeAddress,
    pub end: CodeAddress,
    pub handler_pc: CodeAddress,
    /// `None` for a catch-all (`catch-all` / finally) handler.
    pub exception_type: Option<String>,
}

/// Access flags relevant to symbolic execution (visibility is not modeled).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct MethodAccess {
    pub is_static: bool,
    pub is_native: bool,
    pub is_abstract: bool,
    pub is_constructor: bool,
}

/// One method's code and metadata, as handed back by the class manager.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Method {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub access: MethodAccess,
    pub register_count: u16,
    pub parameter_registers: Vec<RegisterId>,
    pub instructions: Vec<Instruction>,
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl Method {
    pub fn signature(&self) -> String {
        format!("{}->{}{}", self.owner, self.name, self.descriptor)
    }

    pub fn entry_address(&self) -> Option<CodeAddress> {
        self.instructions.first().map(|instruction| instruction.offset)
    }

    pub fn instruction_at(&self, address: CodeAddress) -> Option<&Instruction> {
        self.instructions
            .iter()
            .find(|instruction| instruction.offset == address)
    }

    pub fn instruction_index_map(&self) -> BTreeMap<CodeAddress, usize> {
        self.instructions
            .iter()
            .enumerate()
            .map(|(index, instruction)| (instruction.offset, index))
            .collect()
    }

    /// Handlers active at `address`, innermost-declared-first.
    pub fn handlers_covering(&self, address: CodeAddress) -> Vec<&ExceptionHandler> {
        self.exception_handlers
            .iter()
            .filter(|handler| handler.start <= address && address < handler.end)
            .collect()
    }
}

/// A static field's declared type and initial value, owned by a class.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct StaticField {
    pub name: String,
    pub field_type: String,
}

/// A class in the analyzed DEX (a "local" class, per the glossary).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Class {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub static_fields: Vec<StaticField>,
    pub methods: Vec<Method>,
    pub has_static_initializer: bool,
}

impl Class {
    pub fn clinit(&self) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.name == "<clinit>")
    }
}
