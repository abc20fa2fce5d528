//! Session and user search requests

use super::{expect_success, PortalClient, PortalError};
use crate::search::{SearchPage, SearchRequest, SessionRecord, UserRecord};
use reqwest::multipart::Form;
use serde::de::DeserializeOwned;

/// Form field carrying the search keyword
pub const KEYWORD_FIELD: &str = "email";

/// Decode a search body that is either the JSON document itself or a JSON
/// string containing it
pub(crate) fn parse_search_body<T: DeserializeOwned>(
    body: &str,
) -> Result<SearchPage<T>, PortalError> {
    let trimmed = body.trim();
    let document = if trimmed.starts_with('"') {
        serde_json::from_str::<String>(trimmed)
            .map_err(|e| PortalError::InvalidResponse(e.to_string()))?
    } else {
        trimmed.to_string()
    };
    serde_json::from_str(&document).map_err(|e| PortalError::InvalidResponse(e.to_string()))
}

impl PortalClient {
    #[tracing::instrument(
        name = "portal.search_sessions",
        skip(self, request),
        fields(search.page = request.page, search.filter = %request.filter),
        err
    )]
    pub async fn search_sessions(
        &self,
        request: &SearchRequest,
    ) -> Result<SearchPage<SessionRecord>, PortalError> {
        let route = self.routes().search_sessions.clone();
        self.search(&route, request).await
    }

    #[tracing::instrument(
        name = "portal.search_users",
        skip(self, request),
        fields(search.page = request.page, search.filter = %request.filter),
        err
    )]
    pub async fn search_users(
        &self,
        request: &SearchRequest,
    ) -> Result<SearchPage<UserRecord>, PortalError> {
        let route = self.routes().search_users.clone();
        self.search(&route, request).await
    }

    async fn search<T: DeserializeOwned>(
        &self,
        route: &str,
        request: &SearchRequest,
    ) -> Result<SearchPage<T>, PortalError> {
        let result = self.fetch_page(route, request).await;
        crate::metrics::record_search(route, result.is_ok());
        result
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        route: &str,
        request: &SearchRequest,
    ) -> Result<SearchPage<T>, PortalError> {
        request
            .validate()
            .map_err(|e| PortalError::InvalidRequest(e.to_string()))?;

        let form = Form::new()
            .text(KEYWORD_FIELD, request.keyword.clone())
            .text("page", request.page.to_string())
            .text("filter", request.filter.clone())
            .text("pageSize", request.page_size.to_string());

        let http_request = self.http().post(self.url(route)).multipart(form);
        let response = expect_success(self.with_csrf(http_request).send().await?).await?;
        let body = response.text().await?;
        parse_search_body(&body)
    }
}
