/// Best-effort document summary produced by the Summarize stage. Any or all
/// fields may be absent — a failed summarization downgrades, it never fails
/// ingestion (§4.4 step 4).
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct DocumentSummary {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}
