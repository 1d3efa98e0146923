use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use fidelis_core::{
    AnalysisMethod, ApiEndpoint, BackendFunction, CodeAnalyzer, CodeFile, ComplexityBand,
    DataField, DataStructure, DataStructureKind, FunctionParam, Language, Representation, Result,
    UiElement, ValidationScope,
};

/// Pattern-based extractor covering the catalog languages. Extraction is
/// deliberately shallow; the semantic comparator and the LLM pairing layer
/// absorb naming and structural noise downstream.
pub struct RegexCodeAnalyzer;

const LANGUAGES: [&str; 7] = [
    "python",
    "javascript",
    "typescript",
    "java",
    "csharp",
    "php",
    "html",
];

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(Patterns::compile)
}

struct Patterns {
    python_def: Regex,
    python_class: Regex,
    python_field: Regex,
    flask_route: Regex,
    js_function: Regex,
    js_arrow: Regex,
    java_method: Regex,
    java_field: Regex,
    class_decl: Regex,
    php_function: Regex,
    html_input: Regex,
    html_button: Regex,
    html_label: Regex,
    attr: Regex,
}

impl Patterns {
    fn compile() -> Self {
        Self {
            python_def: Regex::new(r"(?m)^\s*def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*(?:->\s*([A-Za-z_\[\], .]+))?\s*:").expect("static regex"),
            python_class: Regex::new(r"(?m)^class\s+([A-Za-z_][A-Za-z0-9_]*)").expect("static regex"),
            python_field: Regex::new(r"(?m)^\s{4}([A-Za-z_][A-Za-z0-9_]*)\s*:\s*([A-Za-z_\[\], .]+?)\s*(?:=.*)?$").expect("static regex"),
            flask_route: Regex::new(r#"@(?:app|blueprint|bp)\.route\(\s*["']([^"']+)["'](?:[^)]*methods\s*=\s*\[([^\]]*)\])?"#).expect("static regex"),
            js_function: Regex::new(r"function\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*\(([^)]*)\)").expect("static regex"),
            js_arrow: Regex::new(r"(?:const|let)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s*)?\(([^)]*)\)\s*=>").expect("static regex"),
            java_method: Regex::new(r"(?:public|protected|private)\s+(?:static\s+)?([A-Za-z_<>\[\]]+)\s+([a-z][A-Za-z0-9_]*)\s*\(([^)]*)\)").expect("static regex"),
            java_field: Regex::new(r"(?m)^\s*(?:public|protected|private)\s+(?:final\s+)?([A-Za-z_<>\[\]]+)\s+([a-z][A-Za-z0-9_]*)\s*(?:=[^;]+)?;").expect("static regex"),
            class_decl: Regex::new(r"(?m)^\s*(?:public\s+|export\s+)?class\s+([A-Za-z_][A-Za-z0-9_]*)").expect("static regex"),
            php_function: Regex::new(r"function\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)").expect("static regex"),
            html_input: Regex::new(r"(?i)<input\b[^>]*>").expect("static regex"),
            html_button: Regex::new(r"(?i)<button\b[^>]*>([^<]*)</button>").expect("static regex"),
            html_label: Regex::new(r"(?i)<label\b[^>]*>([^<]*)</label>").expect("static regex"),
            attr: Regex::new(r#"([A-Za-z-]+)\s*=\s*["']([^"']*)["']"#).expect("static regex"),
        }
    }
}

fn parse_params(raw: &str) -> Vec<FunctionParam> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != "self" && *p != "$this")
        .map(|p| {
            // "name: Type", "Type name" and bare "name" all occur.
            if let Some((name, type_name)) = p.split_once(':') {
                FunctionParam {
                    name: name.trim().trim_start_matches('$').to_string(),
                    type_name: Some(type_name.trim().to_string()).filter(|t| !t.is_empty()),
                }
            } else if let Some((type_name, name)) = p.rsplit_once(' ') {
                FunctionParam {
                    name: name.trim().trim_start_matches('$').to_string(),
                    type_name: Some(type_name.trim().to_string()),
                }
            } else {
                FunctionParam {
                    name: p.trim_start_matches('$').trim_end_matches("=").trim().to_string(),
                    type_name: None,
                }
            }
        })
        .collect()
}

fn complexity_for(body_len: usize) -> ComplexityBand {
    match body_len {
        0..=400 => ComplexityBand::Low,
        401..=2000 => ComplexityBand::Medium,
        _ => ComplexityBand::High,
    }
}

fn extract_python(content: &str, rep: &mut Representation) {
    let p = patterns();
    for capture in p.python_def.captures_iter(content) {
        rep.functions.push(BackendFunction {
            name: capture[1].to_string(),
            parameters: parse_params(&capture[2]),
            return_type: capture.get(3).map(|m| m.as_str().trim().to_string()),
            http_method: None,
            route: None,
            logic_summary: None,
            complexity: complexity_for(content.len()),
            analysis_method: AnalysisMethod::RegexFallback,
        });
    }
    for capture in p.python_class.captures_iter(content) {
        let class_name = capture[1].to_string();
        let start = capture.get(0).map(|m| m.end()).unwrap_or(0);
        let body = &content[start..];
        let end = p.python_class.find(body).map(|m| m.start()).unwrap_or(body.len());
        let fields = p
            .python_field
            .captures_iter(&body[..end])
            .map(|f| DataField {
                name: f[1].to_string(),
                type_name: f[2].trim().to_string(),
                required: !f[2].contains("Optional"),
                constraints: Vec::new(),
            })
            .collect::<Vec<_>>();
        if !fields.is_empty() {
            rep.data_structures.push(DataStructure {
                name: class_name,
                kind: DataStructureKind::Model,
                fields,
                analysis_method: AnalysisMethod::RegexFallback,
            });
        }
    }
    for capture in p.flask_route.captures_iter(content) {
        let methods = capture
            .get(2)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|s| s.trim().trim_matches(['\'', '"']).to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec!["GET".to_string()]);
        // The decorated function follows the decorator.
        let after = &content[capture.get(0).map(|m| m.end()).unwrap_or(0)..];
        let handler = p
            .python_def
            .captures(after)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| "anonymous".to_string());
        rep.endpoints.push(ApiEndpoint {
            path: capture[1].to_string(),
            methods,
            handler,
            analysis_method: AnalysisMethod::RegexFallback,
        });
    }
}

fn extract_javascript(content: &str, rep: &mut Representation) {
    let p = patterns();
    for capture in p.js_function.captures_iter(content).chain(p.js_arrow.captures_iter(content)) {
        rep.functions.push(BackendFunction {
            name: capture[1].to_string(),
            parameters: parse_params(&capture[2]),
            return_type: None,
            http_method: None,
            route: None,
            logic_summary: None,
            complexity: complexity_for(content.len()),
            analysis_method: AnalysisMethod::RegexFallback,
        });
    }
    extract_markup(content, rep);
}

fn extract_java_like(content: &str, rep: &mut Representation) {
    let p = patterns();
    for capture in p.java_method.captures_iter(content) {
        rep.functions.push(BackendFunction {
            name: capture[2].to_string(),
            parameters: parse_params(&capture[3]),
            return_type: Some(capture[1].to_string()).filter(|t| t != "void"),
            http_method: None,
            route: None,
            logic_summary: None,
            complexity: complexity_for(content.len()),
            analysis_method: AnalysisMethod::RegexFallback,
        });
    }
    for capture in p.class_decl.captures_iter(content) {
        let fields = p
            .java_field
            .captures_iter(content)
            .map(|f| DataField {
                name: f[2].to_string(),
                type_name: f[1].to_string(),
                required: true,
                constraints: Vec::new(),
            })
            .collect::<Vec<_>>();
        if !fields.is_empty() {
            rep.data_structures.push(DataStructure {
                name: capture[1].to_string(),
                kind: DataStructureKind::Model,
                fields,
                analysis_method: AnalysisMethod::RegexFallback,
            });
            break; // fields are file-scoped; attribute them to the first class
        }
    }
}

fn extract_php(content: &str, rep: &mut Representation) {
    let p = patterns();
    for capture in p.php_function.captures_iter(content) {
        rep.functions.push(BackendFunction {
            name: capture[1].to_string(),
            parameters: parse_params(&capture[2]),
            return_type: None,
            http_method: None,
            route: None,
            logic_summary: None,
            complexity: complexity_for(content.len()),
            analysis_method: AnalysisMethod::RegexFallback,
        });
    }
    extract_markup(content, rep);
}

fn attributes_of(tag: &str) -> BTreeMap<String, String> {
    patterns()
        .attr
        .captures_iter(tag)
        .map(|c| (c[1].to_lowercase(), c[2].to_string()))
        .collect()
}

fn extract_markup(content: &str, rep: &mut Representation) {
    let p = patterns();
    for m in p.html_input.find_iter(content) {
        let attributes = attributes_of(m.as_str());
        let id = attributes
            .get("id")
            .or_else(|| attributes.get("name"))
            .cloned()
            .unwrap_or_else(|| format!("input_{}", rep.ui_elements.len() + 1));
        let text = attributes.get("placeholder").cloned();
        rep.ui_elements.push(UiElement {
            kind: "input".to_string(),
            id,
            text,
            attributes,
            analysis_method: AnalysisMethod::RegexFallback,
        });
    }
    for capture in p.html_button.captures_iter(content) {
        let tag = capture.get(0).map(|m| m.as_str()).unwrap_or_default();
        let attributes = attributes_of(tag);
        let id = attributes
            .get("id")
            .cloned()
            .unwrap_or_else(|| format!("button_{}", rep.ui_elements.len() + 1));
        rep.ui_elements.push(UiElement {
            kind: "button".to_string(),
            id,
            text: Some(capture[1].trim().to_string()).filter(|t| !t.is_empty()),
            attributes,
            analysis_method: AnalysisMethod::RegexFallback,
        });
    }
    for capture in p.html_label.captures_iter(content) {
        let tag = capture.get(0).map(|m| m.as_str()).unwrap_or_default();
        let attributes = attributes_of(tag);
        let id = attributes
            .get("for")
            .or_else(|| attributes.get("id"))
            .cloned()
            .unwrap_or_else(|| format!("label_{}", rep.ui_elements.len() + 1));
        rep.ui_elements.push(UiElement {
            kind: "label".to_string(),
            id,
            text: Some(capture[1].trim().to_string()).filter(|t| !t.is_empty()),
            attributes,
            analysis_method: AnalysisMethod::RegexFallback,
        });
    }
}

#[async_trait]
impl CodeAnalyzer for RegexCodeAnalyzer {
    fn languages(&self) -> &[&'static str] {
        &LANGUAGES
    }

    async fn analyze(&self, file: &CodeFile, _scope: ValidationScope) -> Result<Representation> {
        let mut rep = Representation::default();
        match &file.language {
            Language::Python => extract_python(&file.content, &mut rep),
            Language::JavaScript | Language::TypeScript => {
                extract_javascript(&file.content, &mut rep)
            }
            Language::Java | Language::CSharp => extract_java_like(&file.content, &mut rep),
            Language::Php => extract_php(&file.content, &mut rep),
            Language::Html => extract_markup(&file.content, &mut rep),
            Language::Other(_) => extract_markup(&file.content, &mut rep),
        }
        rep.disambiguate_ids();
        Ok(rep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn analyze(path: &str, content: &str) -> Representation {
        RegexCodeAnalyzer
            .analyze(&CodeFile::new(path, content), ValidationScope::Full)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn python_functions_and_routes() {
        let source = r#"
@app.route("/api/products", methods=['GET', 'POST'])
def list_products(category, limit):
    return products

def helper(x) -> int:
    return x
"#;
        let rep = analyze("app.py", source).await;
        assert_eq!(rep.functions.len(), 2);
        assert_eq!(rep.functions[0].name, "list_products");
        assert_eq!(rep.functions[0].parameters.len(), 2);
        assert_eq!(rep.functions[1].return_type.as_deref(), Some("int"));
        assert_eq!(rep.endpoints.len(), 1);
        assert_eq!(rep.endpoints[0].path, "/api/products");
        assert_eq!(rep.endpoints[0].methods, vec!["GET", "POST"]);
        assert_eq!(rep.endpoints[0].handler, "list_products");
    }

    #[tokio::test]
    async fn python_model_fields() {
        let source = r#"
class Product:
    name: str
    price: float
    note: Optional[str] = None
"#;
        let rep = analyze("models.py", source).await;
        assert_eq!(rep.data_structures.len(), 1);
        let model = &rep.data_structures[0];
        assert_eq!(model.name, "Product");
        assert_eq!(model.fields.len(), 3);
        assert!(model.fields[0].required);
        assert!(!model.fields[2].required);
    }

    #[tokio::test]
    async fn jsx_ui_elements() {
        let source = r#"
function LoginForm() {
  return (
    <form>
      <input id="user_name" placeholder="User Name" />
      <button id="submit_btn">Submit</button>
      <label for="user_name">User Name</label>
    </form>
  );
}
"#;
        let rep = analyze("Login.jsx", source).await;
        assert_eq!(rep.functions[0].name, "LoginForm");
        let kinds: Vec<_> = rep.ui_elements.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, ["input", "button", "label"]);
        assert_eq!(rep.ui_elements[0].id, "user_name");
        assert_eq!(rep.ui_elements[1].text.as_deref(), Some("Submit"));
    }

    #[tokio::test]
    async fn java_methods_and_fields() {
        let source = r#"
public class Product {
    private String name;
    private double price;

    public String getName(int index) { return name; }
    public void setName(String name) { this.name = name; }
}
"#;
        let rep = analyze("Product.java", source).await;
        assert_eq!(rep.data_structures[0].fields.len(), 2);
        assert_eq!(rep.functions.len(), 2);
        assert_eq!(rep.functions[0].return_type.as_deref(), Some("String"));
        assert!(rep.functions[1].return_type.is_none());
    }
}
