use std::{fmt::Display, ops::Deref};

pub type Span = (usize, usize);

#[derive(Debug, Clone, Copy)]
pub struct Spanned<T> {
    pub span: Span,
    pub inner: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, inner: T) -> Self {
        Self { span, inner }
    }
}

impl<T> Deref for Spanned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T: Display> Display for Spanned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl<T: PartialEq> PartialEq for Spanned<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

pub type Line<'input> = Spanned<LineKind<'input>>;

#[derive(Debug, PartialEq)]
pub enum LineKind<'input> {
    MethodBegin(Spanned<&'input str>),
    BlockBegin(BlockHeader),
    Close,
    Instr(InstrLine<'input>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineType {
    MethodBegin,
    BlockBegin,
    Close,
    Instr,
}

impl<'input> LineKind<'input> {
    pub fn kind(&self) -> LineType {
        match self {
            LineKind::MethodBegin(_) => LineType::MethodBegin,
            LineKind::BlockBegin(_) => LineType::BlockBegin,
            LineKind::Close => LineType::Close,
            LineKind::Instr(_) => LineType::Instr,
        }
    }
}

impl Display for LineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LineType::MethodBegin => "method header",
            LineType::BlockBegin => "block header",
            LineType::Close => "closing brace",
            LineType::Instr => "instruction",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockAttr {
    Try,
    Catch,
}

#[derive(Debug, PartialEq)]
pub struct BlockHeader {
    pub number: Spanned<u32>,
    pub attrs: Vec<BlockAttr>,
    pub successors: Vec<Spanned<u32>>,
}

#[derive(Debug, PartialEq)]
pub struct InstrLine<'input> {
    pub name: Spanned<&'input str>,
    pub opcode: Spanned<&'input str>,
    pub attrs: Vec<Spanned<&'input str>>,
    pub inputs: Vec<Spanned<&'input str>>,
    pub environment: Option<Vec<Option<Spanned<&'input str>>>>,
}

peg::parser!( pub grammar hir() for str {
    pub rule line() -> Option<Line<'input>>
        = _ lo:position!()
            inner:(method_begin() / block_begin() / close() / instr())?
            hi:position!() _
            { inner.map(|inner| Spanned::new((lo, hi), inner)) }

    rule unsigned() -> u32
        = n:$(quiet!{['0'..='9']+}) {? n.parse().or(Err("u32")) }
        / expected!("unsigned")

    rule spanned<T>(r: rule<T>) -> Spanned<T>
        = lo:position!() inner:r() hi:position!() { Spanned::new((lo, hi), inner) }

    rule method_name() -> Spanned<&'input str>
        = spanned(<$(quiet!{
            [ 'a'..='z' | 'A'..='Z' | '_' ][ 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.' | '$' ]*
        })>)
        / expected!("method name")

    rule opcode() -> Spanned<&'input str>
        = spanned(<$(quiet!{ [ 'A'..='Z' ][ 'a'..='z' | 'A'..='Z' | '0'..='9' ]* })>)
        / expected!("opcode")

    rule value_name() -> Spanned<&'input str>
        = spanned(<$(quiet!{ [ 'a'..='z' ]['0'..='9']+ })>)
        / expected!("value name")

    rule attr() -> Spanned<&'input str>
        = spanned(<$(quiet!{
            [ 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.' | '$' | '-' | '+' ]+
        })>)
        / expected!("attribute")

    rule block_ref() -> Spanned<u32>
        = "B" n:spanned(<unsigned()>) { n }

    rule comment() = "#" [_]*

    rule ws() = quiet!{[' ' | '\t' | '\r']+}

    rule _() = [' ' | '\t' | '\r']* comment()?

    rule method_begin() -> LineKind<'input>
        = "method" ws() name:method_name() _ "{"
        { LineKind::MethodBegin(name) }

    rule block_attr() -> BlockAttr
        = "try" { BlockAttr::Try }
        / "catch" { BlockAttr::Catch }

    rule block_begin() -> LineKind<'input>
        = number:block_ref()
            attrs:(ws() a:block_attr() { a })*
            successors:(_ "->" _ s:(block_ref() ++ (_ "," _)) { s })?
            _ "{"
        { LineKind::BlockBegin(BlockHeader {
            number,
            attrs,
            successors: successors.unwrap_or_default(),
        }) }

    rule close() -> LineKind<'input>
        = "}" { LineKind::Close }

    rule env_slot() -> Option<Spanned<&'input str>>
        = "_" { None }
        / v:value_name() { Some(v) }

    rule instr() -> LineKind<'input>
        = name:value_name() _ ":" _ opcode:opcode()
            attrs:("<" _ a:(attr() ** (_ "," _)) _ ">" { a })?
            inputs:(_ "[" _ i:(value_name() ** (_ "," _)) _ "]" { i })?
            environment:(_ "env" _ "[" _ e:(env_slot() ** (_ "," _)) _ "]" { e })?
        { LineKind::Instr(InstrLine {
            name,
            opcode,
            attrs: attrs.unwrap_or_default(),
            inputs: inputs.unwrap_or_default(),
            environment,
        }) }
});

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_instr(input: &str) -> InstrLine<'_> {
        match hir::line(input).unwrap().unwrap().inner {
            LineKind::Instr(i) => i,
            other => panic!("not an instruction: {other:?}"),
        }
    }

    #[test]
    fn test_instr_line() {
        let i = parse_instr("  i7: InstanceFieldGet<8, volatile> [l1] env[i2, _]  # load");
        assert_eq!(*i.name, "i7");
        assert_eq!(*i.opcode, "InstanceFieldGet");
        assert_eq!(i.attrs.iter().map(|a| a.inner).collect::<Vec<_>>(), ["8", "volatile"]);
        assert_eq!(i.inputs.len(), 1);
        let env = i.environment.unwrap();
        assert_eq!(env.len(), 2);
        assert!(env[1].is_none());
    }

    #[test]
    fn test_negative_float_attr() {
        let i = parse_instr("d3: DoubleConstant<-inf>");
        assert_eq!(*i.attrs[0], "-inf");
        assert!(i.inputs.is_empty());
        assert!(i.environment.is_none());
    }

    #[test]
    fn test_block_header() {
        let line = hir::line("B1 try -> B3, B2 {").unwrap().unwrap();
        let LineKind::BlockBegin(header) = line.inner else {
            panic!("not a block header")
        };
        assert_eq!(*header.number, 1);
        assert_eq!(header.attrs, [BlockAttr::Try]);
        assert_eq!(
            header.successors.iter().map(|s| s.inner).collect::<Vec<_>>(),
            [3, 2]
        );
    }

    #[test]
    fn test_method_and_blank_lines() {
        assert!(matches!(
            hir::line("method Main.$noinline$f {").unwrap().unwrap().inner,
            LineKind::MethodBegin(_)
        ));
        assert_eq!(hir::line("   # only a comment").unwrap(), None);
        assert_eq!(hir::line("").unwrap(), None);
        assert!(hir::line("i1: add [i0]").is_err());
    }
}
