//! MDX query compiler
//!
//! Turns a structured [`QueryRequest`] into query text. Sections are
//! assembled in a fixed order and an absent section contributes no text at
//! all:
//!
//! ```text
//! {custom} select non empty { {values} } on 0{, slicer on 1} from ( select {filters} from [{model}] )
//! ```
//!
//! The subselect is always present, even with no filters.

use crate::error::{Error, Result};
use crate::request::{CompilationTarget, QueryRequest};

/// Line separator inside the `with` block
const LINE_SEPARATOR: &str = "\n";

/// Compile a request into query text for its compilation target
///
/// Only MDX is supported; DAX fails with [`Error::NotImplemented`].
pub fn compile(request: &QueryRequest) -> Result<String> {
    match request.compilation_target {
        CompilationTarget::Mdx => compile_mdx(request),
        CompilationTarget::Dax => Err(Error::NotImplemented(
            "DAX compilation is not supported".to_string(),
        )),
    }
}

fn non_empty(items: &Option<Vec<String>>) -> Option<&[String]> {
    items.as_deref().filter(|i| !i.is_empty())
}

/// `<expr> on <axis>` for each filter, axis counting from 0
fn filter_section(request: &QueryRequest) -> String {
    non_empty(&request.filters)
        .map(|filters| {
            filters
                .iter()
                .enumerate()
                .map(|(axis, filter)| format!("{} on {}", filter, axis))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

/// `, <slicer> on 1`, or nothing when there are no slices
fn slicer_suffix(request: &QueryRequest) -> String {
    let Some(slices) = non_empty(&request.slices) else {
        return String::new();
    };

    let joined = slices.join(", ");
    let slicer = match &request.default_measure {
        Some(measure) => format!("nonempty( ({}), {})", joined, measure),
        None => format!("({})", joined),
    };

    format!(", {} on 1", slicer)
}

/// `with` block listing sets before members, one per line
fn custom_section(request: &QueryRequest) -> String {
    let sets = non_empty(&request.custom_sets).unwrap_or_default();
    let members = non_empty(&request.custom_members).unwrap_or_default();

    if sets.is_empty() && members.is_empty() {
        return String::new();
    }

    let mut section = format!("with {}", LINE_SEPARATOR);
    for set in sets {
        section.push_str(&format!("set {}{}", set, LINE_SEPARATOR));
    }
    for member in members {
        section.push_str(&format!("member {}{}", member, LINE_SEPARATOR));
    }
    section
}

fn compile_mdx(request: &QueryRequest) -> Result<String> {
    let values = request
        .values
        .as_deref()
        .ok_or(Error::MissingField("values"))?
        .join(", ");

    Ok(format!(
        "{} select non empty {{ {} }} on 0{} from ( select {} from [{}] )",
        custom_section(request),
        values,
        slicer_suffix(request),
        filter_section(request),
        request.model_name.as_deref().unwrap_or_default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> QueryRequest {
        QueryRequest::new("test-model", vec!["[Measures].[Sales Amount]".to_string()])
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_values_only() {
        let request = QueryRequest::new(
            "test-model",
            strings(&["[Measures].[Sales Amount]", "[Measures].[Sales Count]"]),
        );
        assert_eq!(
            compile(&request).unwrap(),
            " select non empty { [Measures].[Sales Amount], [Measures].[Sales Count] } on 0 from ( select  from [test-model] )"
        );
    }

    #[test]
    fn test_single_filter() {
        let request = base().with_filters(strings(&["[Product].[Product].&[Apple]"]));
        assert_eq!(
            compile(&request).unwrap(),
            " select non empty { [Measures].[Sales Amount] } on 0 from ( select [Product].[Product].&[Apple] on 0 from [test-model] )"
        );
    }

    #[test]
    fn test_filters_take_increasing_axes() {
        let request = base().with_filters(strings(&["[A]", "[B]", "[C]"]));
        let text = compile(&request).unwrap();
        assert!(text.contains("select [A] on 0, [B] on 1, [C] on 2 from [test-model]"));
    }

    #[test]
    fn test_slice_with_filter() {
        let request = base()
            .with_slices(strings(&["[Date].[Year].[All].children"]))
            .with_filters(strings(&["[Product].[Product].&[Apple]"]));
        assert_eq!(
            compile(&request).unwrap(),
            " select non empty { [Measures].[Sales Amount] } on 0, ([Date].[Year].[All].children) on 1 from ( select [Product].[Product].&[Apple] on 0 from [test-model] )"
        );
    }

    #[test]
    fn test_custom_set() {
        let request = base()
            .with_slices(strings(&["[Date].[Year].[All].children"]))
            .with_filters(strings(&["[Product].[Product].&[Apple]"]))
            .with_custom_sets(strings(&[
                "test as { [Date].[Date].&[20200101] : [Date].[Date].&[20200301] }",
            ]));
        assert_eq!(
            compile(&request).unwrap(),
            "with \nset test as { [Date].[Date].&[20200101] : [Date].[Date].&[20200301] }\n select non empty { [Measures].[Sales Amount] } on 0, ([Date].[Year].[All].children) on 1 from ( select [Product].[Product].&[Apple] on 0 from [test-model] )"
        );
    }

    #[test]
    fn test_custom_member() {
        let request = base()
            .with_slices(strings(&["[Date].[Year].[All].children"]))
            .with_filters(strings(&["[Product].[Product].&[Apple]"]))
            .with_custom_members(strings(&["[Date].[Date].[Others] as \"dummy\""]));
        assert_eq!(
            compile(&request).unwrap(),
            "with \nmember [Date].[Date].[Others] as \"dummy\"\n select non empty { [Measures].[Sales Amount] } on 0, ([Date].[Year].[All].children) on 1 from ( select [Product].[Product].&[Apple] on 0 from [test-model] )"
        );
    }

    #[test]
    fn test_sets_precede_members() {
        let request = base()
            .with_custom_members(strings(&["m1"]))
            .with_custom_sets(strings(&["s1", "s2"]));
        let text = compile(&request).unwrap();
        assert!(text.starts_with("with \nset s1\nset s2\nmember m1\n select"));
    }

    #[test]
    fn test_default_measure_wraps_slices() {
        let request = base()
            .with_slices(strings(&["[Date].[Year].[All].children"]))
            .with_default_measure("[Measures].[Sales Count]");
        assert_eq!(
            compile(&request).unwrap(),
            " select non empty { [Measures].[Sales Amount] } on 0, nonempty( ([Date].[Year].[All].children), [Measures].[Sales Count]) on 1 from ( select  from [test-model] )"
        );
    }

    #[test]
    fn test_default_measure_with_two_slices() {
        let request = base()
            .with_slices(strings(&[
                "[Date].[Year].[All].children",
                "[Date].[Month].[All].children",
            ]))
            .with_default_measure("[Measures].[Sales Count]");
        assert_eq!(
            compile(&request).unwrap(),
            " select non empty { [Measures].[Sales Amount] } on 0, nonempty( ([Date].[Year].[All].children, [Date].[Month].[All].children), [Measures].[Sales Count]) on 1 from ( select  from [test-model] )"
        );
    }

    #[test]
    fn test_default_measure_without_slices_is_ignored() {
        let request = base().with_default_measure("[Measures].[Sales Count]");
        let text = compile(&request).unwrap();
        assert!(!text.contains("nonempty"));
        assert!(!text.contains("on 1"));
    }

    #[test]
    fn test_empty_slices_omit_axis() {
        let request = base().with_slices(Vec::new());
        assert!(!compile(&request).unwrap().contains("on 1"));
    }

    #[test]
    fn test_dax_not_implemented() {
        let request = base().with_target(CompilationTarget::Dax);
        assert!(matches!(compile(&request), Err(Error::NotImplemented(_))));
    }

    #[test]
    fn test_missing_values() {
        let request = QueryRequest {
            model_name: Some("test-model".to_string()),
            ..Default::default()
        };
        assert!(matches!(compile(&request), Err(Error::MissingField("values"))));
    }
}
