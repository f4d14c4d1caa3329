//! In-memory inverted index over the vendor/product pairs of the database

use std::collections::{BTreeSet, HashMap};

/// Index tuning knobs, sourced from [`crate::config::IndexConfig`]
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub relevance_floor: f32,
    pub max_results: usize,
    pub weight_boost: f32,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            relevance_floor: 0.08,
            max_results: 25,
            weight_boost: 1.5,
        }
    }
}

/// A scored candidate pair returned by a search
#[derive(Debug, Clone, PartialEq)]
pub struct ProductHit {
    pub vendor: String,
    pub product: String,
    pub score: f32,
}

#[derive(Debug)]
struct ProductDocument {
    vendor: String,
    product: String,
    vendor_tokens: Vec<String>,
    product_tokens: Vec<String>,
}

/// Searchable index of every distinct `(vendor, product)` pair.
///
/// Both fields are tokenized and scored tf-idf style; query tokens that also
/// appear in the caller's weighting sets receive a score boost. The index is
/// built once at startup and shared read-only across resolution workers.
#[derive(Debug)]
pub struct ProductIndex {
    documents: Vec<ProductDocument>,
    vendor_doc_freq: HashMap<String, usize>,
    product_doc_freq: HashMap<String, usize>,
    options: IndexOptions,
}

impl ProductIndex {
    pub fn build(pairs: &[(String, String)], options: IndexOptions) -> Self {
        let mut documents = Vec::with_capacity(pairs.len());
        let mut vendor_doc_freq: HashMap<String, usize> = HashMap::new();
        let mut product_doc_freq: HashMap<String, usize> = HashMap::new();

        let mut seen = BTreeSet::new();
        for (vendor, product) in pairs {
            if !seen.insert((vendor.to_lowercase(), product.to_lowercase())) {
                continue;
            }
            let vendor_tokens = tokenize(vendor);
            let product_tokens = tokenize(product);
            for token in vendor_tokens.iter().collect::<BTreeSet<_>>() {
                *vendor_doc_freq.entry(token.clone()).or_default() += 1;
            }
            for token in product_tokens.iter().collect::<BTreeSet<_>>() {
                *product_doc_freq.entry(token.clone()).or_default() += 1;
            }
            documents.push(ProductDocument {
                vendor: vendor.clone(),
                product: product.clone(),
                vendor_tokens,
                product_tokens,
            });
        }

        Self {
            documents,
            vendor_doc_freq,
            product_doc_freq,
            options,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Searches for candidate pairs matching the given vendor and product
    /// evidence terms.
    ///
    /// `vendor_weights` / `product_weights` boost tokens backed by the most
    /// trustworthy evidence. Hits below the relevance floor are dropped and
    /// the result is capped at `max_results`, ordered by descending score
    /// with vendor/product as the tie break.
    pub fn search(
        &self,
        vendor_terms: &[&str],
        product_terms: &[&str],
        vendor_weights: &[String],
        product_weights: &[String],
    ) -> Vec<ProductHit> {
        let vendor_query = query_tokens(vendor_terms);
        let product_query = query_tokens(product_terms);
        if vendor_query.is_empty() && product_query.is_empty() {
            return Vec::new();
        }

        let vendor_boosts = weight_tokens(vendor_weights);
        let product_boosts = weight_tokens(product_weights);
        let total_docs = self.documents.len();

        let mut hits: Vec<ProductHit> = self
            .documents
            .iter()
            .filter_map(|doc| {
                let vendor_score = self.field_score(
                    &vendor_query,
                    &doc.vendor_tokens,
                    &self.vendor_doc_freq,
                    &vendor_boosts,
                    total_docs,
                );
                let product_score = self.field_score(
                    &product_query,
                    &doc.product_tokens,
                    &self.product_doc_freq,
                    &product_boosts,
                    total_docs,
                );
                let score = vendor_score + product_score;
                (score >= self.options.relevance_floor).then(|| ProductHit {
                    vendor: doc.vendor.clone(),
                    product: doc.product.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.vendor.cmp(&b.vendor))
                .then_with(|| a.product.cmp(&b.product))
        });
        hits.truncate(self.options.max_results);
        hits
    }

    fn field_score(
        &self,
        query: &[String],
        doc_tokens: &[String],
        doc_freq: &HashMap<String, usize>,
        boosts: &BTreeSet<String>,
        total_docs: usize,
    ) -> f32 {
        if query.is_empty() || doc_tokens.is_empty() {
            return 0.0;
        }
        let length_norm = 1.0 / (doc_tokens.len() as f32).sqrt();
        let mut score = 0.0;
        for token in query {
            let tf = doc_tokens.iter().filter(|t| *t == token).count() as f32;
            if tf == 0.0 {
                continue;
            }
            let df = doc_freq.get(token).copied().unwrap_or(0);
            let idf = (1.0 + total_docs as f32 / (1.0 + df as f32)).ln();
            let mut token_score = tf.sqrt() * idf * length_norm;
            if boosts.contains(token) {
                token_score *= self.options.weight_boost;
            }
            score += token_score;
        }
        // normalize against the query length so the floor is comparable
        // across differently sized evidence sets
        score / (query.len() as f32).sqrt()
    }
}

fn query_tokens(terms: &[&str]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut tokens = Vec::new();
    for term in terms {
        for token in tokenize(term) {
            if seen.insert(token.clone()) {
                tokens.push(token);
            }
        }
    }
    tokens
}

fn weight_tokens(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .flat_map(|v| tokenize(v))
        .collect()
}

/// Splits on non-alphanumeric characters and camelCase boundaries, then
/// lowercases, so `springFramework` and `spring-framework` tokenize alike.
fn tokenize(value: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in value.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_numeric();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
