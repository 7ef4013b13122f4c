use std::fmt;

use super::{ArrayId, Expr, ExprKind, Index, Op, Scalar};

impl fmt::Display for ArrayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arg{}", self.0)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Bool(v) => f.write_str(if v { "1" } else { "0" }),
            Scalar::Double(v) if v.is_nan() => f.write_str("NAN"),
            Scalar::Double(v) if v.is_infinite() => {
                f.write_str(if v < 0.0 { "-INFINITY" } else { "INFINITY" })
            }
            Scalar::Double(v) => {
                let text = v.to_string();
                if text.contains(['.', 'e', 'E']) {
                    f.write_str(&text)
                } else {
                    write!(f, "{text}.0")
                }
            }
        }
    }
}

fn infix(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::Sum => " + ",
        Op::Product => " * ",
        Op::Quotient => " / ",
        Op::Mod => " % ",
        Op::Eq => " == ",
        Op::NotEq => " != ",
        Op::Less => " < ",
        Op::LessEq => " <= ",
        Op::Greater => " > ",
        Op::GreaterEq => " >= ",
        Op::And => " && ",
        Op::Or => " || ",
        _ => return None,
    })
}

fn call_name(op: Op, kind: ExprKind) -> &'static str {
    let double = kind == ExprKind::Double;
    match op {
        Op::Exp => "exp",
        Op::Ln => "log",
        Op::Sqrt => "sqrt",
        Op::Abs if double => "fabs",
        Op::Abs => "labs",
        Op::Min if double => "fmin",
        Op::Min => "min",
        Op::Max if double => "fmax",
        Op::Max => "max",
        _ => "?",
    }
}

/// C-like rendering, used for logs and scope summaries.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(value) => write!(f, "{value}"),
            Expr::Index(index) => write!(f, "{index}"),
            Expr::Var(name) => f.write_str(name),
            Expr::Element { array, index } => write!(f, "{array}[{index}]"),
            Expr::Length(array) => write!(f, "len({array})"),
            Expr::Apply { op, args } => match op {
                Op::Negate => write!(f, "(-{})", args[0]),
                Op::Not => write!(f, "(!{})", args[0]),
                Op::Conditional => write!(f, "({} ? {} : {})", args[0], args[1], args[2]),
                op => match infix(*op) {
                    Some(symbol) => {
                        f.write_str("(")?;
                        for (i, arg) in args.iter().enumerate() {
                            if i > 0 {
                                f.write_str(symbol)?;
                            }
                            write!(f, "{arg}")?;
                        }
                        f.write_str(")")
                    }
                    None => {
                        write!(f, "{}(", call_name(*op, self.kind()))?;
                        for (i, arg) in args.iter().enumerate() {
                            if i > 0 {
                                f.write_str(", ")?;
                            }
                            write!(f, "{arg}")?;
                        }
                        f.write_str(")")
                    }
                },
            },
        }
    }
}
