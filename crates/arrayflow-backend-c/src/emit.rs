//! Statement and expression emission.

use arrayflow::backend::{ConversionError, ConversionResult};
use arrayflow::expr::{ArrayId, Expr, ExprKind, Op, Scalar};
use arrayflow::scope::{ArrayRole, Extent, KernelProgram, Scope, Statement, Target};

use crate::utils::{format_f64, push_block, push_line, sanitize_symbol};

const PRELUDE: &str = r#"
    #include <math.h>

    static inline long af_min(long a, long b) { return a < b ? a : b; }
    static inline long af_max(long a, long b) { return a > b ? a : b; }
"#;

pub(crate) fn render_program(program: &KernelProgram) -> ConversionResult<String> {
    let name = sanitize_symbol(&program.name);
    let mut module = String::new();
    push_line(&mut module, 0, &format!("/* {} -> {} */", program.name, program.output_shape));
    for binding in &program.arrays {
        let role = match &binding.role {
            ArrayRole::Output => "output".to_string(),
            ArrayRole::Input { position } => format!("input {position}"),
            ArrayRole::Intermediate => "intermediate".to_string(),
            ArrayRole::Constant { values } => format!("constant, {} values", values.len()),
        };
        push_line(
            &mut module,
            0,
            &format!("/* {}: {} ({role}) */", array_name(binding.id), binding.shape),
        );
    }
    push_block(&mut module, 0, PRELUDE);

    let schedule = program.schedule();
    for scope in &schedule {
        module.push('\n');
        render_scope(&mut module, &name, scope)?;
    }

    module.push('\n');
    push_line(
        &mut module,
        0,
        &format!("void {name}(double *const *args, const long *lens) {{"),
    );
    for scope in &schedule {
        let extent = match &scope.extent {
            Extent::Fixed(count) => count.to_string(),
            Extent::Dynamic { array, divisor } => {
                format!("lens[{}] / {divisor}", array.position())
            }
        };
        let arguments: Vec<String> = scope
            .arguments
            .iter()
            .map(|array| format!("args[{0}], lens[{0}]", array.position()))
            .collect();
        let mut call = vec!["global_id".to_string()];
        call.extend(arguments);
        push_line(
            &mut module,
            1,
            &format!("for (long global_id = 0; global_id < {extent}; ++global_id) {{"),
        );
        push_line(
            &mut module,
            2,
            &format!("{}({});", scope_symbol(&name, scope), call.join(", ")),
        );
        push_line(&mut module, 1, "}");
    }
    push_line(&mut module, 0, "}");
    Ok(module)
}

fn scope_symbol(program: &str, scope: &Scope) -> String {
    format!("{program}_{}", sanitize_symbol(&scope.name))
}

fn array_name(array: ArrayId) -> String {
    format!("arg{}", array.0)
}

fn render_scope(module: &mut String, program: &str, scope: &Scope) -> ConversionResult<()> {
    let writes = scope.writes();
    let mut params = vec!["long global_id".to_string()];
    for array in &scope.arguments {
        let qualifier = if writes.contains(array) { "" } else { "const " };
        let name = array_name(*array);
        params.push(format!("{qualifier}double *{name}"));
        params.push(format!("long {name}_len"));
    }
    push_line(
        module,
        0,
        &format!("static void {}({}) {{", scope_symbol(program, scope), params.join(", ")),
    );
    render_statements(module, 1, &scope.statements)?;
    push_line(module, 0, "}");
    Ok(())
}

fn render_statements(
    module: &mut String,
    indent: usize,
    statements: &[Statement],
) -> ConversionResult<()> {
    for statement in statements {
        match statement {
            Statement::Declare { name, kind, value } => {
                let ty = match kind {
                    ExprKind::Double => "double",
                    ExprKind::Int => "long",
                    ExprKind::Bool => "int",
                };
                push_line(
                    module,
                    indent,
                    &format!("{ty} {} = {};", sanitize_symbol(name), render_expr(value)?),
                );
            }
            Statement::Assign { target, value } => {
                let target = match target {
                    Target::Var(name) => sanitize_symbol(name),
                    Target::Element { array, index } => {
                        format!("{}[{}]", array_name(*array), render_expr(index)?)
                    }
                };
                push_line(module, indent, &format!("{target} = {};", render_expr(value)?));
            }
            Statement::Loop { index, limit, body } => {
                let name = sanitize_symbol(&index.name);
                push_line(
                    module,
                    indent,
                    &format!(
                        "for (long {name} = 0; {name} < {}; ++{name}) {{",
                        render_expr(limit)?
                    ),
                );
                render_statements(module, indent + 1, body)?;
                push_line(module, indent, "}");
            }
        }
    }
    Ok(())
}

pub(crate) fn render_expr(expr: &Expr) -> ConversionResult<String> {
    Ok(match expr {
        Expr::Const(Scalar::Int(value)) => value.to_string(),
        Expr::Const(Scalar::Double(value)) => format_f64(*value),
        Expr::Const(Scalar::Bool(value)) => String::from(if *value { "1" } else { "0" }),
        Expr::Index(index) => sanitize_symbol(&index.name),
        Expr::Var(name) => sanitize_symbol(name),
        Expr::Element { array, index } => format!("{}[{}]", array_name(*array), render_expr(index)?),
        Expr::Length(array) => format!("{}_len", array_name(*array)),
        Expr::Apply { op, args } => {
            let rendered = args
                .iter()
                .map(render_expr)
                .collect::<ConversionResult<Vec<_>>>()?;
            let integral = expr.kind() != ExprKind::Double;
            match op {
                Op::Sum => infix(&rendered, " + "),
                Op::Product => infix(&rendered, " * "),
                Op::Quotient => infix(&rendered, " / "),
                Op::Mod if integral => infix(&rendered, " % "),
                Op::Mod => call("fmod", &rendered),
                Op::Eq => infix(&rendered, " == "),
                Op::NotEq => infix(&rendered, " != "),
                Op::Less => infix(&rendered, " < "),
                Op::LessEq => infix(&rendered, " <= "),
                Op::Greater => infix(&rendered, " > "),
                Op::GreaterEq => infix(&rendered, " >= "),
                Op::And => infix(&rendered, " && "),
                Op::Or => infix(&rendered, " || "),
                Op::Negate => format!("(-{})", unary(op, &rendered)?),
                Op::Not => format!("(!{})", unary(op, &rendered)?),
                Op::Exp => call("exp", &rendered),
                Op::Ln => call("log", &rendered),
                Op::Sqrt => call("sqrt", &rendered),
                Op::Abs if integral => call("labs", &rendered),
                Op::Abs => call("fabs", &rendered),
                Op::Min if integral => call("af_min", &rendered),
                Op::Min => call("fmin", &rendered),
                Op::Max if integral => call("af_max", &rendered),
                Op::Max => call("fmax", &rendered),
                Op::Conditional => match rendered.as_slice() {
                    [condition, then, otherwise] => format!("({condition} ? {then} : {otherwise})"),
                    _ => {
                        return Err(ConversionError::new(format!(
                            "conditional expects 3 operands, found {}",
                            rendered.len()
                        )))
                    }
                },
            }
        }
    })
}

fn unary<'a>(op: &Op, rendered: &'a [String]) -> ConversionResult<&'a str> {
    match rendered {
        [only] => Ok(only),
        _ => Err(ConversionError::new(format!(
            "{op:?} expects 1 operand, found {}",
            rendered.len()
        ))),
    }
}

fn infix(rendered: &[String], symbol: &str) -> String {
    format!("({})", rendered.join(symbol))
}

fn call(function: &str, rendered: &[String]) -> String {
    format!("{function}({})", rendered.join(", "))
}
