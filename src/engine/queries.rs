use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{filter_available, merge_any};
use super::eligibility;
use super::schedule::{resolve, ResolvedDay};
use super::slots::generate_slots;
use super::{Engine, EngineError};

impl Engine {
    pub async fn business(&self, id: Ulid) -> Option<Business> {
        let bs = self.get_business(&id)?;
        Some(bs.read().await.business.clone())
    }

    pub async fn business_by_slug(&self, slug: &str) -> Option<Business> {
        let id = *self.slugs.get(slug)?.value();
        self.business(id).await
    }

    pub async fn list_services(&self, business_id: Ulid) -> Result<Vec<Service>, EngineError> {
        let bs = self.business_or_not_found(&business_id)?;
        let guard = bs.read().await;
        Ok(guard.services.values().cloned().collect())
    }

    pub async fn list_collaborators(&self, business_id: Ulid) -> Result<Vec<Collaborator>, EngineError> {
        let bs = self.business_or_not_found(&business_id)?;
        let guard = bs.read().await;
        Ok(guard.collaborators.values().cloned().collect())
    }

    /// Active collaborators linked to the service, ascending by id.
    pub async fn eligible_collaborators(&self, service_id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let business_id = self
            .owner_of(&service_id)
            .ok_or(EngineError::InvalidService(service_id))?;
        let bs = self.business_or_not_found(&business_id)?;
        let guard = bs.read().await;
        Ok(eligibility::eligible_collaborators(&guard, service_id)?
            .into_iter()
            .collect())
    }

    /// Effective hours for a date, for the business alone or one of its collaborators.
    pub async fn resolve_schedule(
        &self,
        business_id: Ulid,
        collaborator_id: Option<Ulid>,
        date: NaiveDate,
    ) -> Result<ResolvedDay, EngineError> {
        let bs = self.business_or_not_found(&business_id)?;
        let guard = bs.read().await;
        let collaborator = match collaborator_id {
            Some(id) => Some(guard.collaborators.get(&id).ok_or(EngineError::NotFound(id))?),
            None => None,
        };
        Ok(resolve(&guard.business, collaborator, date))
    }

    /// Bookable slots for a service on a date: resolve, generate and filter for
    /// every candidate collaborator, then merge. Empty for unlinked services.
    pub async fn available_slots(
        &self,
        business_id: Ulid,
        service_id: Ulid,
        choice: CollaboratorChoice,
        date: NaiveDate,
    ) -> Result<Vec<BookableSlot>, EngineError> {
        let bs = self.business_or_not_found(&business_id)?;
        let guard = bs.read().await;
        if !guard.business.active {
            return Err(EngineError::BusinessDisabled(business_id));
        }
        let eligible = eligibility::eligible_collaborators(&guard, service_id)?;
        if eligible.is_empty() {
            return Ok(Vec::new());
        }
        let candidates = eligibility::candidates_for(&guard, service_id, choice)?;
        let duration = guard
            .services
            .get(&service_id)
            .map(|s| s.duration_minutes)
            .ok_or(EngineError::InvalidService(service_id))?;
        let policy = guard.business.policy;
        let now = self.clock.now();

        let mut per_collaborator = Vec::with_capacity(candidates.len());
        for id in candidates {
            let day = resolve(&guard.business, guard.collaborators.get(&id), date).day;
            let Some(book) = self.get_book(&id) else { continue };
            let book = book.read().await;
            let free = filter_available(
                generate_slots(&day, duration, policy.buffer_minutes),
                date,
                book.on(date),
                now,
                &policy,
            );
            per_collaborator.push((id, free));
        }
        Ok(merge_any(per_collaborator))
    }

    pub async fn appointments_on(&self, collaborator_id: Ulid, date: NaiveDate) -> Result<Vec<Appointment>, EngineError> {
        let book = self
            .get_book(&collaborator_id)
            .ok_or(EngineError::NotFound(collaborator_id))?;
        let guard = book.read().await;
        Ok(guard.on(date).to_vec())
    }

    pub async fn get_appointment(&self, id: Ulid) -> Option<Appointment> {
        let (collaborator_id, date) = *self.appointments.get(&id)?.value();
        let book = self.get_book(&collaborator_id)?;
        let guard = book.read().await;
        guard.get(date, id).cloned()
    }

    pub fn get_client(&self, id: Ulid) -> Option<Client> {
        self.clients.get(&id).map(|c| c.value().clone())
    }
}
