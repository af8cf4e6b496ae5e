//! Expression evaluation by precedence climbing.
//!
//! The parser is written against [`Operands`], which supplies tokens, the value
//! of names and the current location, so the same code serves the assembler
//! and the unit tests below.
use crate::address::{Address, Op};
use crate::error::SourcePos;
use crate::token::{Reserved, Token, TokenKind};
use crate::Error;

pub trait Operands {
    fn next_token(&mut self) -> Result<Token, Error>;
    fn push_back(&mut self, t: Token);
    /// Value of a name; forward references are `Undefined`.
    fn resolve(&mut self, name: &str, pos: SourcePos) -> Result<Address, Error>;
    /// The address the statement being assembled starts at (`*`).
    fn location(&self) -> Address;
}

/// Parse a full expression.
pub fn expression(ctx: &mut impl Operands) -> Result<Address, Error> { climb(ctx, 1) }

/// Parse operators binding at least as tightly as `min_prec`.
pub fn climb(ctx: &mut impl Operands, min_prec: u8) -> Result<Address, Error> {
    let lhs = unary(ctx)?;
    climb_from(ctx, lhs, min_prec)
}

/// Continue an expression whose first operand has already been evaluated.
pub fn climb_from(ctx: &mut impl Operands, mut lhs: Address, min_prec: u8) -> Result<Address, Error> {
    loop {
        let t = ctx.next_token()?;
        let (op, prec) = match binary_op(&t) {
            Some((op, prec)) if prec >= min_prec => (op, prec),
            _ => {
                ctx.push_back(t);
                return Ok(lhs);
            }
        };
        let rhs = climb(ctx, prec + 1)?;
        lhs = lhs.binary(op, rhs).map_err(|e| at(e, t.pos))?;
    }
}

fn binary_op(t: &Token) -> Option<(Op, u8)> {
    let TokenKind::Reserved(r) = t.kind else {
        return None;
    };
    let r = match r {
        Reserved::Pipe => (Op::Or, 1),
        Reserved::Caret => (Op::Xor, 2),
        Reserved::Amp => (Op::And, 3),
        Reserved::Shl => (Op::Shl, 4),
        Reserved::Shr => (Op::Shr, 4),
        Reserved::Plus => (Op::Add, 5),
        Reserved::Minus => (Op::Sub, 5),
        Reserved::Star => (Op::Mul, 6),
        Reserved::Slash => (Op::Div, 6),
        Reserved::Percent => (Op::Mod, 6),
        _ => return None,
    };
    Some(r)
}

fn unary(ctx: &mut impl Operands) -> Result<Address, Error> {
    let t = ctx.next_token()?;
    let result = match t.kind {
        TokenKind::Reserved(Reserved::Minus) => unary(ctx)?.negate(),
        TokenKind::Reserved(Reserved::Tilde) => unary(ctx)?.complement(),
        TokenKind::Reserved(Reserved::Less) => unary(ctx)?.low(),
        TokenKind::Reserved(Reserved::Greater) => unary(ctx)?.high(),
        TokenKind::Reserved(Reserved::Plus) => unary(ctx),
        _ => {
            ctx.push_back(t);
            return primary(ctx);
        }
    };
    result.map_err(|e| at(e, t.pos))
}

fn primary(ctx: &mut impl Operands) -> Result<Address, Error> {
    let t = ctx.next_token()?;
    match t.kind {
        TokenKind::Number(n) => Ok(Address::constant(n as u16)),
        TokenKind::Identifier(ref name) => ctx.resolve(name, t.pos),
        TokenKind::Reserved(Reserved::Star) => Ok(ctx.location()),
        TokenKind::Reserved(open @ (Reserved::LParen | Reserved::LBracket)) => {
            let v = climb(ctx, 1)?;
            let close = if open == Reserved::LParen {
                Reserved::RParen
            } else {
                Reserved::RBracket
            };
            expect(ctx, close)?;
            Ok(v)
        }
        _ => {
            let e = syntax_err!(t.pos, "expected an expression, found {}", t);
            ctx.push_back(t);
            Err(e)
        }
    }
}

/// Consume the reserved token `r` or fail with a syntax error.
pub fn expect(ctx: &mut impl Operands, r: Reserved) -> Result<Token, Error> {
    let t = ctx.next_token()?;
    if t.is(r) {
        return Ok(t);
    }
    let e = syntax_err!(t.pos, "expected {:?}, found {}", r, t);
    ctx.push_back(t);
    Err(e)
}

/// Give a positionless error the position of the token that caused it.
pub fn at(mut e: Error, pos: SourcePos) -> Error {
    if e.pos.is_none() {
        e.pos = Some(pos);
    }
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{AddressType, Part, SegmentKind};
    use crate::files::FileTable;
    use crate::token::Tokenizer;
    use crate::ErrorKind;
    use std::collections::HashMap;

    struct Calc {
        tokens: Tokenizer,
        names: HashMap<&'static str, Address>,
    }
    impl Operands for Calc {
        fn next_token(&mut self) -> Result<Token, Error> { self.tokens.next() }
        fn push_back(&mut self, t: Token) { self.tokens.unread(t) }
        fn resolve(&mut self, name: &str, _pos: SourcePos) -> Result<Address, Error> {
            Ok(self.names.get(name).copied().unwrap_or_else(Address::undefined))
        }
        fn location(&self) -> Address { Address::in_segment(SegmentKind::Code, 0x40) }
    }

    fn eval(src: &str) -> Result<Address, Error> {
        let mut files = FileTable::new();
        let id = files.add_source("expr.asm", src);
        let mut calc = Calc {
            tokens: Tokenizer::new(&files, id),
            names: HashMap::from([
                ("table", Address::in_segment(SegmentKind::Data, 0x10)),
                ("ten", Address::constant(10)),
            ]),
        };
        let v = expression(&mut calc)?;
        let rest = calc.next_token()?;
        assert!(rest.is_end_of_statement(), "unparsed input: {}", rest);
        Ok(v)
    }

    #[test]
    fn precedence() -> Result<(), Error> {
        assert_eq!(eval("1 + 2 * 3")?, Address::constant(7));
        assert_eq!(eval("[1 + 2] * 3")?, Address::constant(9));
        assert_eq!(eval("1 | 2 & 3 ^ 4")?, Address::constant(1 | ((2 & 3) ^ 4)));
        assert_eq!(eval("1 << 2 + 1")?, Address::constant(8));
        assert_eq!(eval("20 - 5 - 3")?, Address::constant(12));
        assert_eq!(eval("-ten + ~0 % 7")?, Address::constant(10u16.wrapping_neg().wrapping_add(0xffff % 7)));
        assert_eq!(eval(">$1234 + <$1234")?, Address::constant(0x12 + 0x34));
        Ok(())
    }

    #[test]
    fn relocatable_values() -> Result<(), Error> {
        assert_eq!(eval("table + 2 * 3")?, Address::in_segment(SegmentKind::Data, 0x16));
        assert_eq!(eval("* - 2")?, Address::in_segment(SegmentKind::Code, 0x3e));
        let hi = eval(">(table + 1)")?;
        assert_eq!((hi.kind, hi.value, hi.part), (AddressType::Data, 0x11, Part::HighByte));
        assert!(eval("later + 1")?.is_undefined());
        Ok(())
    }

    #[test]
    fn errors_carry_positions() {
        let e = eval("table * 2").unwrap_err();
        assert_eq!((e.kind, e.pos.map(|p| p.col)), (ErrorKind::AddressUsage, Some(7)));
        let e = eval("(1 + 2").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Syntax);
        let e = eval("3 / 0").unwrap_err();
        assert_eq!(e.pos.map(|p| p.col), Some(3));
        assert!(eval("+").is_err());
    }
}
