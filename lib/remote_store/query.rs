/// Builds Drive `files.list` search expressions without splicing raw values into the filter.
///
/// Every value goes through [`DriveQuery::literal`], which escapes `\` and `'` the way the Drive
/// query grammar expects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveQuery {
    clauses: Vec<String>,
}

impl DriveQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name_equals(mut self, name: &str) -> Self {
        self.clauses.push(format!("name = {}", Self::literal(name)));
        self
    }

    pub fn in_folder(mut self, folder_id: &str) -> Self {
        self.clauses
            .push(format!("{} in parents", Self::literal(folder_id)));
        self
    }

    pub fn not_trashed(mut self) -> Self {
        self.clauses.push("trashed = false".to_string());
        self
    }

    pub fn build(&self) -> String {
        self.clauses.join(" and ")
    }

    fn literal(value: &str) -> String {
        let mut quoted = String::with_capacity(value.len() + 2);
        quoted.push('\'');
        for ch in value.chars() {
            if ch == '\\' || ch == '\'' {
                quoted.push('\\');
            }
            quoted.push(ch);
        }
        quoted.push('\'');
        quoted
    }
}
