//! Mapping language parser
//!
//! Recursive descent over the shared token stream, one handler per
//! top-level keyword. Embedded expressions (`where`, `check`, `log`,
//! `default` and target right-hand sides) are handed to the path expression
//! parser, which stops at the first token that cannot continue an
//! expression.

use crate::atoms::{
    Atom, ConceptMapAtom, ConceptMappingAtom, DependentAtom, DocumentAtom, GroupAtom,
    ParameterAtom, RuleAtom, RuleSourceAtom, RuleTargetAtom, TargetValue,
};
use fml_model::{
    ConceptMapEquivalence, InputMode, Parameter, SourceListMode, StructureMap, StructureMode,
    TargetListMode, TypeMode,
};
use fml_path::{Expr, Literal, ParseError, Token, TokenKind, TokenStream, UnaryOp, parse_expression};
use std::path::Path;
use tracing::trace;

/// Parse mapping language source text into a map document
///
/// # Errors
///
/// Returns `Unexpected token: <token>` with the token's line and column when
/// the text does not follow the grammar, or `Unexpected end of input`.
pub fn parse_mapping_language(text: &str) -> Result<StructureMap, ParseError> {
    let document = StructureMapParser::new(TokenStream::from_text(text)).parse()?;
    Ok(document.into())
}

/// Mapping language front end
pub struct MappingLanguage;

impl MappingLanguage {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse mapping language source text
    ///
    /// # Errors
    ///
    /// Returns an error when the text does not parse.
    pub fn parse(text: &str) -> Result<StructureMap, ParseError> {
        parse_mapping_language(text)
    }

    /// Parse a `.map` file
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn parse_file(path: &Path) -> Result<StructureMap, ParseError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ParseError::new(format!("Failed to read file: {e}")))?;
        Self::parse(&content)
    }

    /// Serialize a map document to pretty-printed JSON
    ///
    /// # Errors
    ///
    /// Returns an error when serialization fails.
    pub fn to_json(map: &StructureMap) -> Result<String, ParseError> {
        serde_json::to_string_pretty(map)
            .map_err(|e| ParseError::new(format!("Failed to serialize: {e}")))
    }

    /// Serialize a map document to YAML
    ///
    /// # Errors
    ///
    /// Returns an error when serialization fails.
    pub fn to_yaml(map: &StructureMap) -> Result<String, ParseError> {
        serde_yaml::to_string(map).map_err(|e| ParseError::new(format!("Failed to serialize: {e}")))
    }
}

impl Default for MappingLanguage {
    fn default() -> Self {
        Self::new()
    }
}

const SOURCE_LIST_MODES: [&str; 5] = ["first", "not_first", "last", "not_last", "only_one"];
const TARGET_LIST_MODES: [&str; 3] = ["first", "last", "collate"];
const EQUIVALENCE_OPERATORS: [&str; 7] = ["==", "=", "-", "!=", ">=", "<=", "~"];

/// Parser state over a token stream
pub struct StructureMapParser {
    stream: TokenStream,
}

impl StructureMapParser {
    #[must_use]
    pub fn new(stream: TokenStream) -> Self {
        Self { stream }
    }

    /// Parse every declaration up to the end of input
    ///
    /// # Errors
    ///
    /// Fails on the first token that does not fit the grammar.
    pub fn parse(mut self) -> Result<DocumentAtom, ParseError> {
        let mut document = DocumentAtom::default();

        while let Some(token) = self.stream.peek().cloned() {
            if token.kind != TokenKind::Symbol {
                return Err(ParseError::unexpected(&token));
            }
            let atom = match token.value.as_str() {
                "map" => self.parse_map()?,
                "uses" => self.parse_uses()?,
                "imports" => self.parse_imports()?,
                "group" => self.parse_group()?,
                "conceptmap" => self.parse_concept_map()?,
                _ => return Err(ParseError::unexpected(&token)),
            };
            document.atoms.push(atom);
        }

        Ok(document)
    }

    fn next(&mut self) -> Result<Token, ParseError> {
        self.stream.consume().ok_or_else(ParseError::end_of_input)
    }

    /// A symbol or string token's text
    fn name(&mut self) -> Result<String, ParseError> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Symbol | TokenKind::String => Ok(token.value),
            _ => Err(ParseError::unexpected(&token)),
        }
    }

    fn keyword<T>(&mut self, lookup: impl Fn(&str) -> Option<T>) -> Result<T, ParseError> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Symbol => lookup(&token.value).ok_or_else(|| ParseError::unexpected(&token)),
            _ => Err(ParseError::unexpected(&token)),
        }
    }

    fn is_at_any(&self, values: &[&str]) -> bool {
        values.iter().any(|v| self.stream.is_at(v))
    }

    // map "<url>" = <name>
    fn parse_map(&mut self) -> Result<Atom, ParseError> {
        self.stream.expect("map")?;
        let url = self.stream.expect_string()?;
        self.stream.expect("=")?;
        let name = self.name()?;
        trace!(url = %url, name = %name, "Parsed map declaration");
        Ok(Atom::Map { url, name })
    }

    // uses "<url>" [alias <name>] as <mode>
    fn parse_uses(&mut self) -> Result<Atom, ParseError> {
        self.stream.expect("uses")?;
        let url = self.stream.expect_string()?;
        let alias = if self.stream.eat("alias") {
            Some(self.name()?)
        } else {
            None
        };
        self.stream.expect("as")?;
        let mode = self.keyword(StructureMode::from_keyword)?;
        Ok(Atom::Uses { url, alias, mode })
    }

    fn parse_imports(&mut self) -> Result<Atom, ParseError> {
        self.stream.expect("imports")?;
        Ok(Atom::Imports(self.stream.expect_string()?))
    }

    // group <name>(<params>) [extends <name>] [<<types>>|<<type+>>] { <rules> }
    fn parse_group(&mut self) -> Result<Atom, ParseError> {
        self.stream.expect("group")?;
        let name = self.stream.expect_symbol()?;
        let parameters = self.parse_parameters()?;

        let extends = if self.stream.eat("extends") {
            Some(self.stream.expect_symbol()?)
        } else {
            None
        };

        let type_mode = if self.stream.eat("<<") {
            let token = self.next()?;
            let mode = match token.value.as_str() {
                "types" => TypeMode::Types,
                "none" => TypeMode::None,
                "type" if self.stream.eat("+") => TypeMode::TypeAndTypes,
                _ => return Err(ParseError::unexpected(&token)),
            };
            self.stream.expect(">>")?;
            mode
        } else {
            TypeMode::None
        };

        let rules = self.parse_rule_block()?;
        trace!(group = %name, rules = rules.len(), "Parsed group");

        Ok(Atom::Group(GroupAtom {
            name,
            parameters,
            extends,
            type_mode,
            rules,
        }))
    }

    fn parse_parameters(&mut self) -> Result<Vec<ParameterAtom>, ParseError> {
        let mut parameters = Vec::new();
        self.stream.expect("(")?;
        while !self.stream.is_at(")") {
            let mode = self.keyword(|k| match k {
                "source" => Some(InputMode::Source),
                "target" => Some(InputMode::Target),
                _ => None,
            })?;
            let name = self.stream.expect_symbol()?;
            let type_name = if self.stream.eat(":") {
                Some(self.stream.expect_symbol()?)
            } else {
                None
            };
            parameters.push(ParameterAtom {
                mode,
                name,
                type_name,
            });

            if !self.stream.eat(",") {
                break;
            }
        }
        self.stream.expect(")")?;
        Ok(parameters)
    }

    fn parse_rule_block(&mut self) -> Result<Vec<RuleAtom>, ParseError> {
        let mut rules = Vec::new();
        self.stream.expect("{")?;
        while !self.stream.is_at("}") {
            if !self.stream.has_more() {
                return Err(ParseError::end_of_input());
            }
            rules.push(self.parse_rule()?);
        }
        self.stream.expect("}")?;
        Ok(rules)
    }

    // [for] <sources> [-> <targets>] [then ...] ["<name>"] ;
    fn parse_rule(&mut self) -> Result<RuleAtom, ParseError> {
        let mut rule = RuleAtom::default();

        self.stream.eat("for");
        rule.sources.push(self.parse_rule_source()?);
        while self.stream.eat(",") {
            rule.sources.push(self.parse_rule_source()?);
        }

        if self.stream.eat("->") {
            rule.targets.push(self.parse_rule_target()?);
            while self.stream.eat(",") {
                rule.targets.push(self.parse_rule_target()?);
            }
        }

        let mut ends_with_block = false;
        if self.stream.eat("then") {
            if !self.stream.is_at("{") {
                rule.dependents.push(self.parse_dependent()?);
                while self.stream.eat(",") {
                    rule.dependents.push(self.parse_dependent()?);
                }
            }
            if self.stream.is_at("{") {
                rule.rules = self.parse_rule_block()?;
                ends_with_block = true;
            }
        }

        if self.stream.peek().is_some_and(|t| t.kind == TokenKind::String) {
            rule.name = Some(self.stream.expect_string()?);
            ends_with_block = false;
        }

        if !self.stream.eat(";") && !ends_with_block {
            return Err(match self.stream.peek() {
                Some(token) => ParseError::unexpected(token),
                None => ParseError::end_of_input(),
            });
        }

        Ok(rule)
    }

    /// `a.b.c` as one dotted string
    fn parse_dotted(&mut self) -> Result<String, ParseError> {
        let mut dotted = self.stream.expect_symbol()?;
        while self.stream.eat(".") {
            dotted.push('.');
            dotted.push_str(&self.stream.expect_symbol()?);
        }
        Ok(dotted)
    }

    fn parse_expression_text(&mut self) -> Result<String, ParseError> {
        Ok(parse_expression(&mut self.stream)?.to_string())
    }

    fn parse_rule_source(&mut self) -> Result<RuleSourceAtom, ParseError> {
        let mut source = RuleSourceAtom {
            context: self.parse_dotted()?,
            ..RuleSourceAtom::default()
        };

        if self.stream.eat(":") {
            source.type_name = Some(self.stream.expect_symbol()?);
        }

        if self.stream.eat("default") {
            let expr = parse_expression(&mut self.stream)?;
            source.default_value = Some(match literal_of(&expr) {
                Some(Literal::String(text) | Literal::DateTime(text)) => text,
                Some(literal) => literal.to_string(),
                None => expr.to_string(),
            });
        }

        if self.is_at_any(&SOURCE_LIST_MODES) {
            source.list_mode = Some(self.keyword(SourceListMode::from_keyword)?);
        }

        if self.stream.eat("as") {
            source.alias = Some(self.stream.expect_symbol()?);
        }

        if self.stream.eat("log") {
            source.log = Some(self.parse_expression_text()?);
        }

        if self.stream.eat("where") {
            source.condition = Some(self.parse_expression_text()?);
        }

        if self.stream.eat("check") {
            source.check = Some(self.parse_expression_text()?);
        }

        if source.log.is_none() && self.stream.eat("log") {
            source.log = Some(self.parse_expression_text()?);
        }

        Ok(source)
    }

    fn parse_rule_target(&mut self) -> Result<RuleTargetAtom, ParseError> {
        let mut target = RuleTargetAtom::default();

        let bare_invocation = self.stream.peek().is_some_and(|t| t.kind == TokenKind::Symbol)
            && self.stream.peek_nth(1).is_some_and(|t| t.is("("));

        if bare_invocation {
            target.value = Some(self.parse_target_value()?);
        } else {
            target.context = Some(self.parse_dotted()?);
            if self.stream.eat("=") {
                target.value = Some(self.parse_target_value()?);
            }
        }

        if self.stream.eat("as") {
            target.alias = Some(self.stream.expect_symbol()?);
        }

        if self.stream.eat("share") {
            target.share = Some(self.stream.expect_symbol()?);
        }

        if self.is_at_any(&TARGET_LIST_MODES) {
            target.list_mode = Some(self.keyword(TargetListMode::from_keyword)?);
        }

        Ok(target)
    }

    fn parse_target_value(&mut self) -> Result<TargetValue, ParseError> {
        let position = self.stream.position();
        let expr = parse_expression(&mut self.stream)?;

        if let Some(literal) = literal_of(&expr) {
            return Ok(TargetValue::Literal(literal_parameter(literal)));
        }

        match expr {
            Expr::Symbol(name) => Ok(TargetValue::Variable(name)),
            Expr::Function {
                base: None,
                name,
                args,
            } => {
                let parameters = args
                    .iter()
                    .map(|arg| argument_parameter(arg).ok_or_else(|| invalid_argument(arg, position)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(TargetValue::Invocation { name, parameters })
            }
            other => Ok(TargetValue::Expression(other.to_string())),
        }
    }

    // <name>(<variable>, ...)
    fn parse_dependent(&mut self) -> Result<DependentAtom, ParseError> {
        let position = self.stream.position();
        let name = self.stream.expect_symbol()?;
        self.stream.expect("(")?;

        let mut variables = Vec::new();
        while !self.stream.is_at(")") {
            let token = self.next()?;
            if token.kind != TokenKind::Symbol {
                return Err(ParseError::unexpected(&token));
            }
            variables.push(token.value);
            if !self.stream.eat(",") {
                break;
            }
        }
        self.stream.expect(")")?;

        trace!(dependent = %name, ?position, "Parsed dependent invocation");
        Ok(DependentAtom { name, variables })
    }

    // conceptmap "<url>" { prefix s = "<url>" ... s:<code> [<op>] t:<code> ... }
    fn parse_concept_map(&mut self) -> Result<Atom, ParseError> {
        self.stream.expect("conceptmap")?;
        let mut concept_map = ConceptMapAtom {
            url: self.name()?,
            prefixes: Vec::new(),
            mappings: Vec::new(),
        };

        self.stream.expect("{")?;
        while !self.stream.is_at("}") {
            if !self.stream.has_more() {
                return Err(ParseError::end_of_input());
            }

            if self.stream.eat("prefix") {
                let prefix = self.stream.expect_symbol()?;
                self.stream.expect("=")?;
                let url = self.name()?;
                concept_map.prefixes.push((prefix, url));
                continue;
            }

            let source_prefix = self.stream.expect_symbol()?;
            self.stream.expect(":")?;
            let source_code = self.next()?.value;

            let equivalence = if self.is_at_any(&EQUIVALENCE_OPERATORS) {
                let token = self.next()?;
                Some(
                    ConceptMapEquivalence::from_operator(&token.value)
                        .ok_or_else(|| ParseError::unexpected(&token))?,
                )
            } else {
                None
            };

            let target_prefix = self.stream.expect_symbol()?;
            self.stream.expect(":")?;
            let target_code = self.next()?.value;

            concept_map.mappings.push(ConceptMappingAtom {
                source_prefix,
                source_code,
                equivalence,
                target_prefix,
                target_code,
            });
        }
        self.stream.expect("}")?;

        Ok(Atom::ConceptMap(concept_map))
    }
}

/// The literal an expression denotes, folding a leading minus into numbers
fn literal_of(expr: &Expr) -> Option<Literal> {
    match expr {
        Expr::Literal(literal) => Some(literal.clone()),
        Expr::Unary {
            op: UnaryOp::Minus,
            operand,
        } => match operand.as_ref() {
            Expr::Literal(Literal::Integer(i)) => Some(Literal::Integer(-i)),
            Expr::Literal(Literal::Decimal(d)) => Some(Literal::Decimal(-d)),
            _ => None,
        },
        _ => None,
    }
}

fn literal_parameter(literal: Literal) -> Parameter {
    match literal {
        Literal::String(s) => Parameter::String(s),
        Literal::Integer(i) => Parameter::Integer(i),
        Literal::Decimal(d) => Parameter::Decimal(d),
        Literal::Boolean(b) => Parameter::Boolean(b),
        Literal::DateTime(s) => Parameter::DateTime(s),
    }
}

/// Transform arguments are identifiers or literals
fn argument_parameter(arg: &Expr) -> Option<Parameter> {
    if let Expr::Symbol(name) = arg {
        return Some(Parameter::Id(name.clone()));
    }
    literal_of(arg).map(literal_parameter)
}

fn invalid_argument(arg: &Expr, position: Option<fml_path::Position>) -> ParseError {
    let message = format!("Unexpected token: {arg}");
    match position {
        Some(position) => ParseError::at(message, position),
        None => ParseError::new(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fml_model::TransformKind;

    #[test]
    fn test_parse_minimal_map() {
        let map = parse_mapping_language(
            r#"map "u" = t group g(source s, target t) { s.a as a -> t.a = a; }"#,
        )
        .unwrap();

        assert_eq!(map.url.as_deref(), Some("u"));
        assert_eq!(map.name.as_deref(), Some("t"));
        let rule = &map.group[0].rule[0];
        assert_eq!(rule.name.as_deref(), Some("a"));
        assert_eq!(rule.source[0].context, "s");
        assert_eq!(rule.source[0].element.as_deref(), Some("a"));
        assert_eq!(rule.target[0].transform, Some(TransformKind::Copy));
        assert_eq!(rule.target[0].parameter, vec![Parameter::Id("a".into())]);
    }

    #[test]
    fn test_parse_uses_and_imports() {
        let map = parse_mapping_language(
            r#"
            uses "http://x/Left" alias Left as source
            uses "http://x/Right" as target
            imports "http://x/lib*"
            "#,
        )
        .unwrap();

        assert_eq!(map.structure.len(), 2);
        assert_eq!(map.structure[0].alias.as_deref(), Some("Left"));
        assert_eq!(map.structure[1].mode, StructureMode::Target);
        assert_eq!(map.import, vec!["http://x/lib*"]);
    }

    #[test]
    fn test_parse_type_modes() {
        let map = parse_mapping_language(
            "group a(source s : A, target t : B) <<types>> {}
             group b(source s, target t) <<type+>> {}
             group c(source s, target t) extends a {}",
        )
        .unwrap();

        assert_eq!(map.group[0].type_mode, TypeMode::Types);
        assert_eq!(map.group[0].input[0].type_name.as_deref(), Some("A"));
        assert_eq!(map.group[1].type_mode, TypeMode::TypeAndTypes);
        assert_eq!(map.group[2].type_mode, TypeMode::None);
        assert_eq!(map.group[2].extends.as_deref(), Some("a"));
    }

    #[test]
    fn test_parse_source_clauses() {
        let map = parse_mapping_language(
            "group g(source src, target tgt) {
                for src.name : HumanName default 'none' first as n
                    where n.use = 'official' check n.family.exists() log n.family
                    -> tgt.name = n;
            }",
        )
        .unwrap();

        let source = &map.group[0].rule[0].source[0];
        assert_eq!(source.type_name.as_deref(), Some("HumanName"));
        assert_eq!(source.default_value_string.as_deref(), Some("none"));
        assert_eq!(source.list_mode, Some(SourceListMode::First));
        assert_eq!(source.variable.as_deref(), Some("n"));
        assert_eq!(source.condition.as_deref(), Some("n.use = 'official'"));
        assert_eq!(source.check.as_deref(), Some("n.family.exists()"));
        assert_eq!(source.log_message.as_deref(), Some("n.family"));
    }

    #[test]
    fn test_parse_target_forms() {
        let map = parse_mapping_language(
            "group g(source src, target tgt) {
                src.a as a -> tgt.a = truncate(a, 3), tgt.b = 'text', tgt.c = a + 1,
                    tgt.d = @2020-01-01, tgt.e = -2 share x, tgt.f as f last;
                src -> create('Patient') as p;
            }",
        )
        .unwrap();

        let targets = &map.group[0].rule[0].target;
        assert_eq!(targets[0].transform, Some(TransformKind::Truncate));
        assert_eq!(
            targets[0].parameter,
            vec![Parameter::Id("a".into()), Parameter::Integer(3)]
        );
        assert_eq!(targets[1].parameter, vec![Parameter::String("text".into())]);
        assert_eq!(targets[2].transform, Some(TransformKind::Evaluate));
        assert_eq!(targets[2].parameter, vec![Parameter::String("a + 1".into())]);
        assert_eq!(
            targets[3].parameter,
            vec![Parameter::DateTime("2020-01-01".into())]
        );
        assert_eq!(targets[4].parameter, vec![Parameter::Integer(-2)]);
        assert_eq!(targets[4].list_mode, vec![TargetListMode::Share]);
        assert_eq!(targets[5].transform, None);
        assert_eq!(targets[5].variable.as_deref(), Some("f"));
        assert_eq!(targets[5].list_mode, vec![TargetListMode::Last]);

        let create = &map.group[0].rule[1].target[0];
        assert_eq!(create.context, None);
        assert_eq!(create.transform, Some(TransformKind::Create));
        assert_eq!(create.variable.as_deref(), Some("p"));
    }

    #[test]
    fn test_parse_dependents_and_blocks() {
        let map = parse_mapping_language(
            r#"group g(source src, target tgt) {
                src.name as sn -> tgt.name as tn then name(sn, tn), other(sn) "names";
                src.item as i then {
                    i.code as c -> tgt.code = c;
                }
                src.x as x then { x.y as y -> tgt.y = y; };
            }"#,
        )
        .unwrap();

        let rules = &map.group[0].rule;
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].name.as_deref(), Some("names"));
        assert_eq!(rules[0].dependent.len(), 2);
        assert_eq!(rules[0].dependent[0].variable, vec!["sn", "tn"]);
        assert_eq!(rules[1].rule.len(), 1);
        assert!(rules[1].target.is_empty());
        assert_eq!(rules[2].rule[0].name.as_deref(), Some("y"));
    }

    #[test]
    fn test_parse_concept_map() {
        let map = parse_mapping_language(
            r##"conceptmap "#gender" {
                prefix s = "http://left"
                prefix t = "http://right"
                s:M == t:male
                s:F t:female
                s:U - t:unknown
            }"##,
        )
        .unwrap();

        let concept_map = &map.contained[0];
        assert_eq!(concept_map.url.as_deref(), Some("#gender"));
        let elements = &concept_map.group[0].element;
        assert_eq!(elements.len(), 3);
        assert_eq!(
            elements[0].target[0].equivalence,
            Some(ConceptMapEquivalence::Equal)
        );
        assert_eq!(elements[1].target[0].equivalence, None);
        assert_eq!(
            elements[2].target[0].equivalence,
            Some(ConceptMapEquivalence::Disjoint)
        );
    }

    #[test]
    fn test_unexpected_token_has_position() {
        let err = parse_mapping_language("map \"u\" = t\nfoo").unwrap_err();
        assert_eq!(err.message, "Unexpected token: foo");
        assert_eq!(err.line, Some(2));
        assert_eq!(err.column, Some(1));
    }

    #[test]
    fn test_invalid_transform_argument() {
        let err = parse_mapping_language(
            "group g(source s, target t) { s.a as a -> t.a = truncate(a.b, 3); }",
        )
        .unwrap_err();
        assert!(err.message.starts_with("Unexpected token: a.b"));
    }

    #[test]
    fn test_missing_semicolon() {
        let err =
            parse_mapping_language("group g(source s, target t) { s.a as a -> t.a = a }")
                .unwrap_err();
        assert_eq!(err.message, "Unexpected token: }");
    }

    #[test]
    fn test_end_of_input() {
        let err = parse_mapping_language("group g(source s, target t) { s.a as a").unwrap_err();
        assert_eq!(err.to_string(), "Unexpected end of input");
    }
}
