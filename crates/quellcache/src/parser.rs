//! Minimal selection-set parser using nom
//!
//! Covers the executable subset the cache reasons about:
//! ```text
//! document   := definition+
//! definition := operation | fragment
//! operation  := selection_set | ("query"|"mutation"|"subscription") name? variables? directives? selection_set
//! fragment   := "fragment" name "on" name directives? selection_set
//! selection  := field | "..." name directives? | "..." ("on" name)? directives? selection_set
//! field      := (alias ":")? name arguments? directives? selection_set?
//! ```
//! Commas, whitespace and `#` comments are ignored between tokens. Anything
//! else (block strings, unicode escapes) is rejected and the caller passes the
//! text through untouched.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while},
    character::complete::{char, digit1, multispace1, one_of, satisfy},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    multi::{many0, many0_count, many1, many1_count},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::ast::{
    ArgValue, Directive, Document, Field, FragmentDefinition, FragmentSpread, InlineFragment,
    OperationDefinition, OperationKind, Selection,
};

/// Query text the parser does not accept
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Parse error: {message}")]
pub struct ParseError {
    /// What went wrong and where
    pub message: String,
}

/// Parse query text into a [`Document`]
pub fn parse_document(source: &str) -> Result<Document, ParseError> {
    let parsed = all_consuming(delimited(
        ignored,
        many1(terminated(definition, ignored)),
        ignored,
    ))(source);

    let definitions = match parsed {
        Ok((_, definitions)) => definitions,
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let snippet: String = e.input.chars().take(24).collect();
            return Err(ParseError {
                message: format!("{:?} near {:?}", e.code, snippet),
            });
        }
        Err(nom::Err::Incomplete(_)) => {
            return Err(ParseError {
                message: "incomplete input".to_string(),
            })
        }
    };

    let mut document = Document::default();
    for definition in definitions {
        match definition {
            Definition::Operation(op) => document.operations.push(op),
            Definition::Fragment(fragment) => document.fragments.push(fragment),
        }
    }
    Ok(document)
}

enum Definition {
    Operation(OperationDefinition),
    Fragment(FragmentDefinition),
}

fn comment(i: &str) -> IResult<&str, &str> {
    recognize(pair(char('#'), take_while(|c: char| c != '\n')))(i)
}

fn ignored_token(i: &str) -> IResult<&str, &str> {
    alt((multispace1, tag(","), comment))(i)
}

fn ignored(i: &str) -> IResult<&str, ()> {
    value((), many0_count(ignored_token))(i)
}

fn ignored1(i: &str) -> IResult<&str, ()> {
    value((), many1_count(ignored_token))(i)
}

fn name(i: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(i)
}

fn definition(i: &str) -> IResult<&str, Definition> {
    alt((
        map(fragment_definition, Definition::Fragment),
        map(operation, Definition::Operation),
    ))(i)
}

fn operation(i: &str) -> IResult<&str, OperationDefinition> {
    alt((
        map(selection_set, |selection_set| OperationDefinition {
            kind: OperationKind::Query,
            name: None,
            variables: Vec::new(),
            directives: Vec::new(),
            selection_set,
        }),
        full_operation,
    ))(i)
}

fn full_operation(i: &str) -> IResult<&str, OperationDefinition> {
    let (i, kind) = alt((
        value(OperationKind::Query, tag("query")),
        value(OperationKind::Mutation, tag("mutation")),
        value(OperationKind::Subscription, tag("subscription")),
    ))(i)?;
    let (i, op_name) = opt(preceded(ignored, name))(i)?;
    let (i, variables) = opt(preceded(ignored, variable_definitions))(i)?;
    let (i, directives) = directives(i)?;
    let (i, selection_set) = preceded(ignored, selection_set)(i)?;

    Ok((
        i,
        OperationDefinition {
            kind,
            name: op_name.map(str::to_string),
            variables: variables.unwrap_or_default(),
            directives,
            selection_set,
        },
    ))
}

fn variable_definitions(i: &str) -> IResult<&str, Vec<String>> {
    delimited(
        char('('),
        many0(preceded(ignored, variable_definition)),
        preceded(ignored, char(')')),
    )(i)
}

fn variable_definition(i: &str) -> IResult<&str, String> {
    map(
        tuple((
            preceded(char('$'), name),
            preceded(ignored, char(':')),
            preceded(ignored, type_ref),
            opt(preceded(tuple((ignored, char('='), ignored)), arg_value)),
            directives,
        )),
        |(var, _, _, _, _)| var.to_string(),
    )(i)
}

fn type_ref(i: &str) -> IResult<&str, ()> {
    value(
        (),
        pair(
            alt((
                name,
                recognize(delimited(
                    char('['),
                    preceded(ignored, type_ref),
                    preceded(ignored, char(']')),
                )),
            )),
            opt(preceded(ignored, char('!'))),
        ),
    )(i)
}

fn fragment_definition(i: &str) -> IResult<&str, FragmentDefinition> {
    map(
        tuple((
            terminated(tag("fragment"), ignored1),
            name,
            preceded(ignored, tag("on")),
            preceded(ignored1, name),
            directives,
            preceded(ignored, selection_set),
        )),
        |(_, fragment_name, _, type_condition, directives, selection_set)| FragmentDefinition {
            name: fragment_name.to_string(),
            type_condition: type_condition.to_string(),
            directives,
            selection_set,
        },
    )(i)
}

fn selection_set(i: &str) -> IResult<&str, Vec<Selection>> {
    delimited(
        char('{'),
        many1(preceded(ignored, selection)),
        preceded(ignored, char('}')),
    )(i)
}

fn selection(i: &str) -> IResult<&str, Selection> {
    alt((fragment_selection, map(field, Selection::Field)))(i)
}

fn fragment_selection(i: &str) -> IResult<&str, Selection> {
    preceded(
        tag("..."),
        preceded(ignored, alt((inline_fragment, fragment_spread))),
    )(i)
}

fn inline_fragment(i: &str) -> IResult<&str, Selection> {
    map(
        tuple((
            opt(preceded(terminated(tag("on"), ignored1), name)),
            directives,
            preceded(ignored, selection_set),
        )),
        |(type_condition, directives, selection_set)| {
            Selection::InlineFragment(InlineFragment {
                type_condition: type_condition.map(str::to_string),
                directives,
                selection_set,
            })
        },
    )(i)
}

fn fragment_spread(i: &str) -> IResult<&str, Selection> {
    map(pair(name, directives), |(spread, directives)| {
        Selection::FragmentSpread(FragmentSpread {
            name: spread.to_string(),
            directives,
        })
    })(i)
}

fn field(i: &str) -> IResult<&str, Field> {
    let (i, first) = name(i)?;
    let (i, second) = opt(preceded(tuple((ignored, char(':'), ignored)), name))(i)?;
    let (alias, field_name) = match second {
        Some(field_name) => (Some(first), field_name),
        None => (None, first),
    };
    let (i, arguments) = opt(preceded(ignored, arguments))(i)?;
    let (i, directives) = directives(i)?;
    let (i, selection_set) = opt(preceded(ignored, selection_set))(i)?;

    Ok((
        i,
        Field {
            alias: alias.map(str::to_string),
            name: field_name.to_string(),
            arguments: arguments.unwrap_or_default(),
            directives,
            selection_set: selection_set.unwrap_or_default(),
        },
    ))
}

fn arguments(i: &str) -> IResult<&str, Vec<(String, ArgValue)>> {
    delimited(
        char('('),
        many0(preceded(ignored, named_value)),
        preceded(ignored, char(')')),
    )(i)
}

fn named_value(i: &str) -> IResult<&str, (String, ArgValue)> {
    map(
        tuple((name, preceded(ignored, char(':')), preceded(ignored, arg_value))),
        |(key, _, val)| (key.to_string(), val),
    )(i)
}

fn directives(i: &str) -> IResult<&str, Vec<Directive>> {
    many0(preceded(ignored, directive))(i)
}

fn directive(i: &str) -> IResult<&str, Directive> {
    map(
        preceded(char('@'), pair(name, opt(preceded(ignored, arguments)))),
        |(directive_name, arguments)| Directive {
            name: directive_name.to_string(),
            arguments: arguments.unwrap_or_default(),
        },
    )(i)
}

fn arg_value(i: &str) -> IResult<&str, ArgValue> {
    alt((
        map(preceded(char('$'), name), |var| ArgValue::Variable(var.to_string())),
        map(float_literal, ArgValue::Float),
        map(int_literal, ArgValue::Int),
        map(string_literal, ArgValue::String),
        map(list_value, ArgValue::List),
        map(object_value, ArgValue::Object),
        map(name, |word| match word {
            "true" => ArgValue::Boolean(true),
            "false" => ArgValue::Boolean(false),
            "null" => ArgValue::Null,
            other => ArgValue::Enum(other.to_string()),
        }),
    ))(i)
}

fn exponent(i: &str) -> IResult<&str, &str> {
    recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1)))(i)
}

fn float_literal(i: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            alt((
                recognize(tuple((char('.'), digit1, opt(exponent)))),
                exponent,
            )),
        ))),
        |text: &str| text.parse::<f64>(),
    )(i)
}

fn int_literal(i: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), |text: &str| {
        text.parse::<i64>()
    })(i)
}

fn string_literal(i: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                is_not("\\\"\n"),
                '\\',
                alt((
                    value("\\", char('\\')),
                    value("\"", char('"')),
                    value("/", char('/')),
                    value("\n", char('n')),
                    value("\r", char('r')),
                    value("\t", char('t')),
                )),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(i)
}

fn list_value(i: &str) -> IResult<&str, Vec<ArgValue>> {
    delimited(
        char('['),
        many0(preceded(ignored, arg_value)),
        preceded(ignored, char(']')),
    )(i)
}

fn object_value(i: &str) -> IResult<&str, Vec<(String, ArgValue)>> {
    delimited(
        char('{'),
        many0(preceded(ignored, named_value)),
        preceded(ignored, char('}')),
    )(i)
}
