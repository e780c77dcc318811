//! Stack catalog
//!
//! Entitlement-tagged building blocks a generated project is assembled
//! from. Storage sits behind [`CatalogStore`]; [`CatalogService`] applies
//! tier filtering on top of whatever the store returns.

use crate::entitlement::visible_items;
use crate::{can_access, GatewayError, GatewayResult, SubscriptionTier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CatalogCategory {
    Languages,
    BackendArchitectures,
    Databases,
    FrontendArchitectures,
    FrontendFrameworks,
    Stylings,
}

impl CatalogCategory {
    pub const ALL: [CatalogCategory; 6] = [
        Self::Languages,
        Self::BackendArchitectures,
        Self::Databases,
        Self::FrontendArchitectures,
        Self::FrontendFrameworks,
        Self::Stylings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Languages => "languages",
            Self::BackendArchitectures => "backend-architectures",
            Self::Databases => "databases",
            Self::FrontendArchitectures => "frontend-architectures",
            Self::FrontendFrameworks => "frontend-frameworks",
            Self::Stylings => "stylings",
        }
    }
}

impl fmt::Display for CatalogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CatalogCategory {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| GatewayError::ResourceNotFound(format!("catalog category '{s}'")))
    }
}

/// One selectable catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub required_tier: SubscriptionTier,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl CatalogItem {
    pub fn new(code: &str, name: &str, required_tier: SubscriptionTier) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
            description: None,
            required_tier,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Optional list filters (`?active=true&tier=1`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct CatalogQuery {
    pub active: Option<bool>,
    pub tier: Option<u8>,
}

impl CatalogQuery {
    fn keeps(&self, item: &CatalogItem) -> bool {
        self.active.map_or(true, |a| item.is_active == a)
            && self.tier.map_or(true, |t| item.required_tier.level() == t)
    }
}

/// Catalog lookup collaborator
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list(&self, category: CatalogCategory) -> GatewayResult<Vec<CatalogItem>>;

    async fn get(&self, category: CatalogCategory, id: Uuid) -> GatewayResult<Option<CatalogItem>>;

    async fn get_by_code(&self, category: CatalogCategory, code: &str) -> GatewayResult<Option<CatalogItem>>;
}

/// Catalog held in process memory
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    items: HashMap<CatalogCategory, Vec<CatalogItem>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item; codes are unique within a category
    pub fn insert(&mut self, category: CatalogCategory, item: CatalogItem) -> GatewayResult<()> {
        let entries = self.items.entry(category).or_default();
        if entries.iter().any(|existing| existing.code == item.code) {
            return Err(GatewayError::BadRequest(format!(
                "duplicate code '{}' in {}",
                item.code, category
            )));
        }
        entries.push(item);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The stock catalog offered by the generator
    pub fn seeded() -> GatewayResult<Self> {
        use CatalogCategory::*;
        use SubscriptionTier::{Free, Premium, PremiumPlus};

        let seed: &[(CatalogCategory, &str, &str, &str, SubscriptionTier)] = &[
            (Languages, "node", "Node.js", "JavaScript runtime for the backend with Express.js", Free),
            (Languages, "python", "Python (FastAPI)", "Modern, fast web framework for Python", Free),
            (Languages, "java", "Java (Spring Boot)", "Robust framework for Java applications", Premium),
            (Languages, "csharp", "C# (.NET)", "Microsoft framework for web applications", Premium),
            (Languages, "go", "Go (Gin)", "Fast language with the Gin framework", PremiumPlus),
            (Languages, "php", "PHP (Laravel)", "Elegant framework for PHP applications", Premium),
            (BackendArchitectures, "mvc", "MVC", "Classic Model-View-Controller architecture", Free),
            (BackendArchitectures, "clean", "Clean Architecture", "Hexagonal architecture with layer separation", Premium),
            (BackendArchitectures, "hexagonal", "Hexagonal", "Ports and adapters architecture", Premium),
            (BackendArchitectures, "layered", "Layered Architecture", "Traditional layered architecture", Premium),
            (BackendArchitectures, "microserv", "Microservices", "Distributed microservice architecture", PremiumPlus),
            (Databases, "sqlite", "SQLite", "Lightweight embedded database", Free),
            (Databases, "postgresql", "PostgreSQL", "Advanced relational database", PremiumPlus),
            (Databases, "mysql", "MySQL", "Popular relational database", PremiumPlus),
            (Databases, "mongodb", "MongoDB", "Document-oriented NoSQL database", PremiumPlus),
            (Databases, "redis", "Redis", "In-memory database for caching", PremiumPlus),
            (FrontendArchitectures, "mvp", "MVP (Server templates)", "Pages rendered on the server", Free),
            (FrontendArchitectures, "spa", "SPA (Single Page App)", "Client-side single page application", Free),
            (FrontendArchitectures, "ssr", "SSR (Server Side Rendering)", "Server rendering with client hydration", Premium),
            (FrontendFrameworks, "react", "React", "JavaScript library for user interfaces", Free),
            (FrontendFrameworks, "vue", "Vue.js", "Progressive framework for user interfaces", Premium),
            (FrontendFrameworks, "angular", "Angular", "Complete framework for web applications", Premium),
            (FrontendFrameworks, "svelte", "Svelte", "Compiled framework for reactive interfaces", Premium),
            (FrontendFrameworks, "nextjs", "Next.js", "React framework with SSR", PremiumPlus),
            (FrontendFrameworks, "nuxt", "Nuxt.js", "Vue.js framework with SSR", PremiumPlus),
            (Stylings, "tailwind", "Tailwind CSS", "Utility-first CSS framework", Free),
            (Stylings, "bootstrap", "Bootstrap", "Popular responsive CSS framework", Free),
            (Stylings, "material", "Material UI", "Material Design React components", Premium),
            (Stylings, "chakra", "Chakra UI", "Modular React component library", Premium),
            (Stylings, "css", "CSS Vanilla", "Plain CSS without a framework", Free),
        ];

        let mut catalog = Self::new();
        for (category, code, name, description, tier) in seed {
            catalog.insert(*category, CatalogItem::new(code, name, *tier).with_description(description))?;
        }
        Ok(catalog)
    }

    fn entries(&self, category: CatalogCategory) -> &[CatalogItem] {
        self.items.get(&category).map(Vec::as_slice).unwrap_or_default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn list(&self, category: CatalogCategory) -> GatewayResult<Vec<CatalogItem>> {
        Ok(self.entries(category).to_vec())
    }

    async fn get(&self, category: CatalogCategory, id: Uuid) -> GatewayResult<Option<CatalogItem>> {
        Ok(self.entries(category).iter().find(|i| i.id == id).cloned())
    }

    async fn get_by_code(&self, category: CatalogCategory, code: &str) -> GatewayResult<Option<CatalogItem>> {
        Ok(self.entries(category).iter().find(|i| i.code == code).cloned())
    }
}

/// Tier-aware catalog reads
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Items visible at `tier`, narrowed by `query`, sorted by name
    pub async fn list(
        &self,
        category: CatalogCategory,
        tier: SubscriptionTier,
        query: &CatalogQuery,
    ) -> GatewayResult<Vec<CatalogItem>> {
        let items = self.store.list(category).await?;
        let mut visible: Vec<_> = visible_items(&items, tier)
            .into_iter()
            .filter(|item| query.keeps(item))
            .collect();
        visible.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(visible)
    }

    pub async fn get(&self, category: CatalogCategory, id: Uuid, tier: SubscriptionTier) -> GatewayResult<CatalogItem> {
        let item = self.store.get(category, id).await?;
        Self::authorize(item, tier, || format!("{category} item {id}"))
    }

    pub async fn get_by_code(
        &self,
        category: CatalogCategory,
        code: &str,
        tier: SubscriptionTier,
    ) -> GatewayResult<CatalogItem> {
        let item = self.store.get_by_code(category, code).await?;
        Self::authorize(item, tier, || format!("{category} item '{code}'"))
    }

    fn authorize(
        item: Option<CatalogItem>,
        tier: SubscriptionTier,
        describe: impl FnOnce() -> String,
    ) -> GatewayResult<CatalogItem> {
        let item = item.ok_or_else(|| GatewayError::ResourceNotFound(describe()))?;
        if !can_access(tier, item.required_tier) {
            return Err(GatewayError::EntitlementDenied {
                current: tier.level(),
                required: item.required_tier.level(),
            });
        }
        Ok(item)
    }
}
