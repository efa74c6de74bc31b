//! Constant folding over UHDM expressions.
//!
//! Parameter defaults, override values, generate conditions and genvar
//! bounds all evaluate through here. Evaluation is best effort: anything not
//! statically computable yields `None` and the caller decides whether that
//! is an error.

use crate::{
    symbols::{SymbolId, SymbolTable},
    uhdm::{Collection, OpType, Serializer, UhdmDetail, UhdmId, UhdmKind},
};
use std::collections::HashMap;

/// Evaluation environment: parameter and genvar values by name.
pub type Env = HashMap<SymbolId, i64>;

/// Evaluates `expr` to an integer constant if possible.
pub fn eval(serializer: &Serializer, symbols: &SymbolTable, expr: UhdmId, env: &Env) -> Option<i64> {
    if expr.is_bad() {
        return None;
    }
    let object = serializer.get(expr);
    match object.kind {
        UhdmKind::Constant => object.value.as_int(),
        UhdmKind::RefObj => {
            if let Some(&value) = env.get(&object.name) {
                return Some(value);
            }
            // a bound reference to an evaluated parameter folds too
            if !object.actual.is_bad() {
                return serializer.get(object.actual).value.as_int();
            }
            None
        }
        UhdmKind::Parameter => object.value.as_int(),
        UhdmKind::Operation => {
            let UhdmDetail::Op(op) = object.detail else { return None };
            let operands = object.owned(Collection::Operands);
            eval_operation(serializer, symbols, op, operands, env)
        }
        UhdmKind::SysFuncCall => {
            // only `$clog2` folds; `$bits` needs the binder's type info
            if &*symbols.text(object.name) == "$clog2" {
                let arg = eval(serializer, symbols, *object.owned(Collection::Operands).first()?, env)?;
                if arg <= 0 {
                    return Some(0);
                }
                return Some(64 - ((arg - 1) as u64).leading_zeros() as i64);
            }
            None
        }
        _ => None,
    }
}

fn eval_operation(
    serializer: &Serializer,
    symbols: &SymbolTable,
    op: OpType,
    operands: &[UhdmId],
    env: &Env,
) -> Option<i64> {
    let unary = |env: &Env| eval(serializer, symbols, *operands.first()?, env);
    let binary = |env: &Env| -> Option<(i64, i64)> {
        let lhs = eval(serializer, symbols, *operands.first()?, env)?;
        let rhs = eval(serializer, symbols, *operands.get(1)?, env)?;
        Some((lhs, rhs))
    };
    Some(match op {
        OpType::Add => {
            let (a, b) = binary(env)?;
            a.wrapping_add(b)
        }
        OpType::Sub => {
            let (a, b) = binary(env)?;
            a.wrapping_sub(b)
        }
        OpType::Mult => {
            let (a, b) = binary(env)?;
            a.wrapping_mul(b)
        }
        OpType::Div => {
            let (a, b) = binary(env)?;
            if b == 0 {
                return None;
            }
            a / b
        }
        OpType::Mod => {
            let (a, b) = binary(env)?;
            if b == 0 {
                return None;
            }
            a % b
        }
        OpType::Pow => {
            let (a, b) = binary(env)?;
            if !(0..=63).contains(&b) {
                return None;
            }
            a.checked_pow(b as u32)?
        }
        OpType::UnaryPlus => unary(env)?,
        OpType::UnaryMinus => unary(env)?.wrapping_neg(),
        OpType::LogNot => (unary(env)? == 0) as i64,
        OpType::BitNeg => !unary(env)?,
        OpType::BitAnd => {
            let (a, b) = binary(env)?;
            a & b
        }
        OpType::BitOr => {
            let (a, b) = binary(env)?;
            a | b
        }
        OpType::BitXor => {
            let (a, b) = binary(env)?;
            a ^ b
        }
        OpType::BitXnor => !{
            let (a, b) = binary(env)?;
            a ^ b
        },
        OpType::UnaryAnd => (unary(env)? == -1) as i64,
        OpType::UnaryNand => (unary(env)? != -1) as i64,
        OpType::UnaryOr => (unary(env)? != 0) as i64,
        OpType::UnaryNor => (unary(env)? == 0) as i64,
        OpType::UnaryXor => (unary(env)?.count_ones() % 2) as i64,
        OpType::UnaryXnor => ((unary(env)?.count_ones() + 1) % 2) as i64,
        OpType::LogAnd => {
            let (a, b) = binary(env)?;
            (a != 0 && b != 0) as i64
        }
        OpType::LogOr => {
            let (a, b) = binary(env)?;
            (a != 0 || b != 0) as i64
        }
        OpType::Lt => {
            let (a, b) = binary(env)?;
            (a < b) as i64
        }
        OpType::Le => {
            let (a, b) = binary(env)?;
            (a <= b) as i64
        }
        OpType::Gt => {
            let (a, b) = binary(env)?;
            (a > b) as i64
        }
        OpType::Ge => {
            let (a, b) = binary(env)?;
            (a >= b) as i64
        }
        OpType::Eq | OpType::CaseEq | OpType::WildEq => {
            let (a, b) = binary(env)?;
            (a == b) as i64
        }
        OpType::Neq | OpType::CaseNeq | OpType::WildNeq => {
            let (a, b) = binary(env)?;
            (a != b) as i64
        }
        OpType::LShift | OpType::ArithLShift => {
            let (a, b) = binary(env)?;
            if !(0..64).contains(&b) {
                return None;
            }
            a.wrapping_shl(b as u32)
        }
        OpType::RShift => {
            let (a, b) = binary(env)?;
            if !(0..64).contains(&b) {
                return None;
            }
            ((a as u64) >> b) as i64
        }
        OpType::ArithRShift => {
            let (a, b) = binary(env)?;
            if !(0..64).contains(&b) {
                return None;
            }
            a >> b
        }
        OpType::Conditional => {
            let cond = eval(serializer, symbols, *operands.first()?, env)?;
            let pick = if cond != 0 { 1 } else { 2 };
            eval(serializer, symbols, *operands.get(pick)?, env)?
        }
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uhdm::ConstValue;

    fn constant(serializer: &mut Serializer, value: i64) -> UhdmId {
        let id = serializer.make(UhdmKind::Constant);
        serializer.get_mut(id).value = ConstValue::Int(value);
        id
    }

    fn operation(serializer: &mut Serializer, op: OpType, operands: &[UhdmId]) -> UhdmId {
        let id = serializer.make(UhdmKind::Operation);
        serializer.get_mut(id).detail = UhdmDetail::Op(op);
        for &operand in operands {
            serializer.own(id, Collection::Operands, operand);
        }
        id
    }

    #[test]
    fn arithmetic_folds() {
        let mut serializer = Serializer::new();
        let two = constant(&mut serializer, 2);
        let three = constant(&mut serializer, 3);
        let sum = operation(&mut serializer, OpType::Add, &[two, three]);
        let product = operation(&mut serializer, OpType::Mult, &[sum, three]);
        let symbols = SymbolTable::new();
        assert_eq!(eval(&serializer, &symbols, product, &Env::new()), Some(15));
    }

    #[test]
    fn references_fold_through_env() {
        let mut serializer = Serializer::new();
        let reference = serializer.make(UhdmKind::RefObj);
        serializer.get_mut(reference).name = SymbolId(9);
        let one = constant(&mut serializer, 1);
        let sub = operation(&mut serializer, OpType::Sub, &[reference, one]);
        let symbols = SymbolTable::new();
        let mut env = Env::new();
        env.insert(SymbolId(9), 8);
        assert_eq!(eval(&serializer, &symbols, sub, &env), Some(7));
        assert_eq!(eval(&serializer, &symbols, sub, &Env::new()), None);
    }

    #[test]
    fn division_by_zero_is_not_a_constant() {
        let mut serializer = Serializer::new();
        let one = constant(&mut serializer, 1);
        let zero = constant(&mut serializer, 0);
        let div = operation(&mut serializer, OpType::Div, &[one, zero]);
        let symbols = SymbolTable::new();
        assert_eq!(eval(&serializer, &symbols, div, &Env::new()), None);
    }

    #[test]
    fn conditional_selects_branch() {
        let mut serializer = Serializer::new();
        let zero = constant(&mut serializer, 0);
        let a = constant(&mut serializer, 10);
        let b = constant(&mut serializer, 20);
        let pick = operation(&mut serializer, OpType::Conditional, &[zero, a, b]);
        let symbols = SymbolTable::new();
        assert_eq!(eval(&serializer, &symbols, pick, &Env::new()), Some(20));
    }

    #[test]
    fn clog2_folds() {
        let mut serializer = Serializer::new();
        let symbols = SymbolTable::new();
        let call = serializer.make(UhdmKind::SysFuncCall);
        serializer.get_mut(call).name = symbols.register("$clog2");
        let arg = constant(&mut serializer, 8);
        serializer.own(call, Collection::Operands, arg);
        assert_eq!(eval(&serializer, &symbols, call, &Env::new()), Some(3));
    }
}
