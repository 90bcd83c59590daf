use chrono::{NaiveDate, Weekday};
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::is_free;
use super::schedule::{expand_scope, validate_day, validate_week};
use super::{BusinessState, Engine, EngineError};

fn check_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() || name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

/// Public booking-page slug: lowercase ASCII letters, digits and `-`.
pub fn valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

fn validate_policy(policy: &BookingPolicy) -> Result<(), EngineError> {
    if !(0..=MAX_BUFFER_MINUTES).contains(&policy.buffer_minutes) {
        return Err(EngineError::InvalidPolicy("buffer must be between 0 and 240 minutes"));
    }
    if policy.buffer_minutes % SLOT_GRANULARITY_MINUTES != 0 {
        return Err(EngineError::InvalidPolicy("buffer must be a multiple of 5 minutes"));
    }
    if policy.min_advance_hours > MAX_MIN_ADVANCE_HOURS {
        return Err(EngineError::InvalidPolicy("minimum advance too large"));
    }
    if policy.max_future_days > MAX_FUTURE_DAYS {
        return Err(EngineError::InvalidPolicy("booking horizon too far"));
    }
    Ok(())
}

fn validate_service(duration_minutes: Minutes, price_cents: i64) -> Result<(), EngineError> {
    if duration_minutes <= 0
        || duration_minutes > MINUTES_PER_DAY
        || duration_minutes % SLOT_GRANULARITY_MINUTES != 0
    {
        return Err(EngineError::InvalidDuration(duration_minutes));
    }
    if price_cents < 0 {
        return Err(EngineError::LimitExceeded("price must not be negative"));
    }
    Ok(())
}

impl Engine {
    // ── Business ─────────────────────────────────────────────

    pub async fn create_business(&self, id: Ulid, slug: &str, name: &str) -> Result<(), EngineError> {
        check_name(name, "business name must be 1 to 200 characters")?;
        if !valid_slug(slug) {
            return Err(EngineError::LimitExceeded("slug must be lowercase letters, digits and '-'"));
        }
        if self.businesses.len() >= MAX_BUSINESSES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many businesses"));
        }
        let _gate = self.commit_gate.read().await;
        if self.businesses.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        // Reserve the slug before the append so concurrent creates can't share it.
        match self.slugs.entry(slug.to_string()) {
            Entry::Occupied(_) => return Err(EngineError::SlugTaken(slug.to_string())),
            Entry::Vacant(v) => {
                v.insert(id);
            }
        }

        let event = Event::BusinessCreated {
            id,
            slug: slug.to_string(),
            name: name.to_string(),
            schedule: WeeklySchedule::default(),
            policy: BookingPolicy::default(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.slugs.remove(slug);
            return Err(e);
        }
        self.apply_global(&event);
        self.notify.send(id, &event);
        tracing::info!(business = %id, slug, "business created");
        Ok(())
    }

    pub async fn set_business_schedule(&self, id: Ulid, schedule: WeeklySchedule) -> Result<(), EngineError> {
        validate_week(&schedule)?;
        let _gate = self.commit_gate.read().await;
        let bs = self.business_or_not_found(&id)?;
        let mut guard = bs.write().await;
        self.persist_and_apply(&mut guard, Event::BusinessScheduleSet { id, schedule })
            .await
    }

    pub async fn set_booking_policy(&self, id: Ulid, policy: BookingPolicy) -> Result<(), EngineError> {
        validate_policy(&policy)?;
        let _gate = self.commit_gate.read().await;
        let bs = self.business_or_not_found(&id)?;
        let mut guard = bs.write().await;
        self.persist_and_apply(&mut guard, Event::BookingPolicySet { id, policy }).await
    }

    /// Soft-disable. History and the slug are kept.
    pub async fn disable_business(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let bs = self.business_or_not_found(&id)?;
        let mut guard = bs.write().await;
        if !guard.business.active {
            return Ok(());
        }
        self.persist_and_apply(&mut guard, Event::BusinessDisabled { id }).await
    }

    // ── Services & staff ─────────────────────────────────────

    pub async fn create_service(
        &self,
        id: Ulid,
        business_id: Ulid,
        name: &str,
        duration_minutes: Minutes,
        price_cents: i64,
    ) -> Result<(), EngineError> {
        check_name(name, "service name must be 1 to 200 characters")?;
        validate_service(duration_minutes, price_cents)?;
        let _gate = self.commit_gate.read().await;
        if self.owners.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let bs = self.business_or_not_found(&business_id)?;
        let mut guard = bs.write().await;
        if guard.services.len() >= MAX_SERVICES_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        let event = Event::ServiceCreated {
            id,
            business_id,
            name: name.to_string(),
            duration_minutes,
            price_cents,
        };
        self.persist_and_apply(&mut guard, event).await
    }

    /// Price changes only affect future admissions; admitted appointments keep their snapshot.
    pub async fn update_service(
        &self,
        id: Ulid,
        name: &str,
        duration_minutes: Minutes,
        price_cents: i64,
        active: bool,
    ) -> Result<(), EngineError> {
        check_name(name, "service name must be 1 to 200 characters")?;
        validate_service(duration_minutes, price_cents)?;
        let _gate = self.commit_gate.read().await;
        let business_id = self.owner_of(&id).ok_or(EngineError::NotFound(id))?;
        let bs = self.business_or_not_found(&business_id)?;
        let mut guard = bs.write().await;
        if !guard.services.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ServiceUpdated {
            id,
            business_id,
            name: name.to_string(),
            duration_minutes,
            price_cents,
            active,
        };
        self.persist_and_apply(&mut guard, event).await
    }

    pub async fn create_collaborator(&self, id: Ulid, business_id: Ulid, name: &str) -> Result<(), EngineError> {
        check_name(name, "collaborator name must be 1 to 200 characters")?;
        let _gate = self.commit_gate.read().await;
        if self.owners.contains_key(&id) || self.businesses.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let bs = self.business_or_not_found(&business_id)?;
        let mut guard = bs.write().await;
        if guard.collaborators.len() >= MAX_COLLABORATORS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many collaborators"));
        }
        let event = Event::CollaboratorCreated {
            id,
            business_id,
            name: name.to_string(),
        };
        self.persist_and_apply(&mut guard, event).await
    }

    /// Deactivated collaborators drop out of eligibility; their booked appointments stay.
    pub async fn set_collaborator_active(&self, id: Ulid, active: bool) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let (business_id, mut guard) = self.collaborator_business_write(id).await?;
        self.persist_and_apply(&mut guard, Event::CollaboratorActiveSet { id, business_id, active })
            .await
    }

    /// `None` reverts the collaborator to the business week.
    pub async fn set_collaborator_schedule(&self, id: Ulid, schedule: Option<WeeklySchedule>) -> Result<(), EngineError> {
        if let Some(week) = &schedule {
            validate_week(week)?;
        }
        let _gate = self.commit_gate.read().await;
        let (business_id, mut guard) = self.collaborator_business_write(id).await?;
        self.persist_and_apply(&mut guard, Event::CollaboratorScheduleSet { id, business_id, schedule })
            .await
    }

    /// Edit one weekday of an owner's week. A collaborator without a custom
    /// week gets one seeded from the business week first.
    pub async fn set_weekday(&self, owner: ScheduleOwner, weekday: Weekday, day: DaySchedule) -> Result<(), EngineError> {
        validate_day(&day)?;
        let _gate = self.commit_gate.read().await;
        let bs = self.business_for_owner(owner)?;
        let mut guard = bs.write().await;
        let event = match owner {
            ScheduleOwner::Business(id) => {
                let mut schedule = guard.business.schedule.clone();
                schedule.set_day(weekday, day);
                Event::BusinessScheduleSet { id, schedule }
            }
            ScheduleOwner::Collaborator(id) => {
                let collaborator = guard.collaborators.get(&id).ok_or(EngineError::NotFound(id))?;
                let mut schedule = collaborator
                    .schedule
                    .clone()
                    .unwrap_or_else(|| guard.business.schedule.clone());
                schedule.set_day(weekday, day);
                Event::CollaboratorScheduleSet {
                    id,
                    business_id: guard.business.id,
                    schedule: Some(schedule),
                }
            }
        };
        self.persist_and_apply(&mut guard, event).await
    }

    // ── Eligibility ──────────────────────────────────────────

    pub async fn grant_eligibility(&self, collaborator_id: Ulid, service_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let (business_id, mut guard) = self.link_business_write(collaborator_id, service_id).await?;
        if guard.links.get(&service_id).is_some_and(|s| s.contains(&collaborator_id)) {
            return Ok(());
        }
        let event = Event::EligibilityGranted {
            business_id,
            collaborator_id,
            service_id,
        };
        self.persist_and_apply(&mut guard, event).await
    }

    pub async fn revoke_eligibility(&self, collaborator_id: Ulid, service_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let (business_id, mut guard) = self.link_business_write(collaborator_id, service_id).await?;
        if !guard.links.get(&service_id).is_some_and(|s| s.contains(&collaborator_id)) {
            return Ok(());
        }
        let event = Event::EligibilityRevoked {
            business_id,
            collaborator_id,
            service_id,
        };
        self.persist_and_apply(&mut guard, event).await
    }

    // ── Overrides ────────────────────────────────────────────

    /// Write `day` over every date of the scope anchored at `anchor`. Returns the dates written.
    pub async fn apply_override(
        &self,
        owner: ScheduleOwner,
        anchor: NaiveDate,
        scope: OverrideScope,
        day: DaySchedule,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        validate_day(&day)?;
        let dates = expand_scope(anchor, scope);
        let _gate = self.commit_gate.read().await;
        let bs = self.business_for_owner(owner)?;
        let mut guard = bs.write().await;
        if guard.overrides_mut(owner).is_none() {
            return Err(EngineError::NotFound(owner_id(owner)));
        }
        let event = Event::OverridesApplied {
            business_id: guard.business.id,
            owner,
            dates: dates.clone(),
            day,
        };
        self.persist_and_apply(&mut guard, event).await?;
        Ok(dates)
    }

    /// Remove the override for `date`. Returns false if there was none.
    pub async fn clear_override(&self, owner: ScheduleOwner, date: NaiveDate) -> Result<bool, EngineError> {
        let _gate = self.commit_gate.read().await;
        let bs = self.business_for_owner(owner)?;
        let mut guard = bs.write().await;
        let present = guard
            .overrides_mut(owner)
            .ok_or(EngineError::NotFound(owner_id(owner)))?
            .contains_key(&date);
        if !present {
            return Ok(false);
        }
        let event = Event::OverrideCleared {
            business_id: guard.business.id,
            owner,
            date,
        };
        self.persist_and_apply(&mut guard, event).await?;
        Ok(true)
    }

    // ── Clients ──────────────────────────────────────────────

    pub async fn create_client(
        &self,
        id: Ulid,
        business_id: Ulid,
        name: &str,
        phone: Option<String>,
        email: Option<String>,
    ) -> Result<(), EngineError> {
        check_name(name, "client name must be 1 to 200 characters")?;
        for contact in [&phone, &email].into_iter().flatten() {
            if contact.len() > MAX_CONTACT_LEN {
                return Err(EngineError::LimitExceeded("contact too long"));
            }
        }
        if self.clients.len() >= MAX_CLIENTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many clients"));
        }
        let _gate = self.commit_gate.read().await;
        if self.clients.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.business_or_not_found(&business_id)?;
        let event = Event::ClientCreated {
            id,
            business_id,
            name: name.to_string(),
            phone,
            email,
        };
        self.wal_append(&event).await?;
        self.apply_global(&event);
        self.notify.send(business_id, &event);
        Ok(())
    }

    /// Recompute a client's stats from their appointments. All of the
    /// business's books are read-locked so no admission lands half-counted.
    pub async fn rebuild_client_stats(&self, client_id: Ulid) -> Result<ClientStats, EngineError> {
        let business_id = self
            .clients
            .get(&client_id)
            .map(|c| c.business_id)
            .ok_or(EngineError::NotFound(client_id))?;
        let bs = self.business_or_not_found(&business_id)?;
        let staff: Vec<Ulid> = bs.read().await.collaborators.keys().copied().collect();

        let mut guards = Vec::with_capacity(staff.len());
        for id in &staff {
            if let Some(book) = self.get_book(id) {
                guards.push(book.read_owned().await);
            }
        }
        let stats = ClientStats::recompute(
            guards
                .iter()
                .flat_map(|g| g.iter())
                .filter(|a| a.client_id() == Some(client_id)),
        );
        let mut client = self.clients.get_mut(&client_id).ok_or(EngineError::NotFound(client_id))?;
        client.stats = stats.clone();
        Ok(stats)
    }

    // ── Appointment lifecycle ────────────────────────────────

    /// Dashboard status change. Leaving a blocking status frees the slot at once;
    /// returning to one (no_show → attended) needs the slot to still be free.
    pub async fn transition_appointment(&self, id: Ulid, to: AppointmentStatus) -> Result<Appointment, EngineError> {
        let _gate = self.commit_gate.read().await;
        let (collaborator_id, date) = self
            .appointments
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let business_id = self
            .owners
            .get(&collaborator_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(collaborator_id))?;
        let bs_lock = self.business_or_not_found(&business_id)?;
        let bs = bs_lock.read().await;
        let book = self.get_book(&collaborator_id).ok_or(EngineError::NotFound(collaborator_id))?;
        let mut guard = book.write().await;
        let current = guard.get(date, id).cloned().ok_or(EngineError::NotFound(id))?;
        if !current.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to,
            });
        }
        if to.blocks() && !current.status.blocks() {
            let others: Vec<Appointment> = guard.on(date).iter().filter(|a| a.id != id).cloned().collect();
            if !is_free(&current.span, &others, bs.business.policy.buffer_minutes) {
                return Err(EngineError::SlotConflict);
            }
        }
        let event = Event::AppointmentStatusChanged {
            id,
            business_id: current.business_id,
            collaborator_id,
            from: current.status,
            to,
        };
        self.persist_to_book(&mut guard, &event).await?;
        drop(guard);
        drop(bs);

        self.notify.send(current.business_id, &event);
        tracing::info!(appointment = %id, from = %current.status, %to, "appointment status changed");
        Ok(Appointment { status: to, ..current })
    }

    pub async fn cancel_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition_appointment(id, AppointmentStatus::Cancelled).await
    }

    // ── Journal maintenance ──────────────────────────────────

    /// Rewrite the journal as the minimal event list that rebuilds current
    /// state. Holds the commit gate exclusively, so no mutation is between
    /// its append and its apply while the snapshot is taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut events = Vec::new();

        let mut business_ids: Vec<Ulid> = self.businesses.iter().map(|e| *e.key()).collect();
        business_ids.sort();
        let mut staff = Vec::new();
        for id in business_ids {
            let Some(bs) = self.get_business(&id) else { continue };
            let guard = bs.read().await;
            snapshot_business(&guard, &mut events);
            staff.extend(guard.collaborators.keys().copied());
        }

        let mut clients: Vec<Client> = self.clients.iter().map(|c| c.value().clone()).collect();
        clients.sort_by_key(|c| c.id);
        events.extend(clients.into_iter().map(|c| Event::ClientCreated {
            id: c.id,
            business_id: c.business_id,
            name: c.name,
            phone: c.phone,
            email: c.email,
        }));

        for id in staff {
            let Some(book) = self.get_book(&id) else { continue };
            let guard = book.read().await;
            events.extend(guard.iter().map(|a| Event::AppointmentAdmitted { appointment: a.clone() }));
        }

        let count = events.len();
        self.wal.compact(events).await?;
        tracing::info!(events = count, "journal compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }

    // ── Lock helpers ─────────────────────────────────────────

    async fn collaborator_business_write(
        &self,
        collaborator_id: Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<BusinessState>), EngineError> {
        let business_id = self
            .owner_of(&collaborator_id)
            .ok_or(EngineError::NotFound(collaborator_id))?;
        let guard = self.business_or_not_found(&business_id)?.write_owned().await;
        if !guard.collaborators.contains_key(&collaborator_id) {
            return Err(EngineError::NotFound(collaborator_id));
        }
        Ok((business_id, guard))
    }

    async fn link_business_write(
        &self,
        collaborator_id: Ulid,
        service_id: Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<BusinessState>), EngineError> {
        let collaborator_business = self
            .owner_of(&collaborator_id)
            .ok_or(EngineError::NotFound(collaborator_id))?;
        let service_business = self.owner_of(&service_id).ok_or(EngineError::NotFound(service_id))?;
        if collaborator_business != service_business {
            return Err(EngineError::CrossTenant(collaborator_id, service_id));
        }
        let guard = self
            .business_or_not_found(&collaborator_business)?
            .write_owned()
            .await;
        if !guard.collaborators.contains_key(&collaborator_id) {
            return Err(EngineError::NotFound(collaborator_id));
        }
        if !guard.services.contains_key(&service_id) {
            return Err(EngineError::NotFound(service_id));
        }
        Ok((collaborator_business, guard))
    }
}

/// Events that recreate one business: settings, catalog, staff, links, overrides.
fn snapshot_business(bs: &BusinessState, events: &mut Vec<Event>) {
    let b = &bs.business;
    events.push(Event::BusinessCreated {
        id: b.id,
        slug: b.slug.clone(),
        name: b.name.clone(),
        schedule: b.schedule.clone(),
        policy: b.policy,
    });
    if !b.active {
        events.push(Event::BusinessDisabled { id: b.id });
    }
    push_overrides(b.id, ScheduleOwner::Business(b.id), &b.overrides, events);

    for s in bs.services.values() {
        events.push(Event::ServiceCreated {
            id: s.id,
            business_id: b.id,
            name: s.name.clone(),
            duration_minutes: s.duration_minutes,
            price_cents: s.price_cents,
        });
        if !s.active {
            events.push(Event::ServiceUpdated {
                id: s.id,
                business_id: b.id,
                name: s.name.clone(),
                duration_minutes: s.duration_minutes,
                price_cents: s.price_cents,
                active: false,
            });
        }
    }
    for c in bs.collaborators.values() {
        events.push(Event::CollaboratorCreated {
            id: c.id,
            business_id: b.id,
            name: c.name.clone(),
        });
        if !c.active {
            events.push(Event::CollaboratorActiveSet {
                id: c.id,
                business_id: b.id,
                active: false,
            });
        }
        if c.schedule.is_some() {
            events.push(Event::CollaboratorScheduleSet {
                id: c.id,
                business_id: b.id,
                schedule: c.schedule.clone(),
            });
        }
        push_overrides(b.id, ScheduleOwner::Collaborator(c.id), &c.overrides, events);
    }
    for (service_id, linked) in &bs.links {
        for collaborator_id in linked {
            events.push(Event::EligibilityGranted {
                business_id: b.id,
                collaborator_id: *collaborator_id,
                service_id: *service_id,
            });
        }
    }
}

fn push_overrides(business_id: Ulid, owner: ScheduleOwner, overrides: &OverrideMap, events: &mut Vec<Event>) {
    events.extend(overrides.iter().map(|(date, day)| Event::OverridesApplied {
        business_id,
        owner,
        dates: vec![*date],
        day: day.clone(),
    }));
}

fn owner_id(owner: ScheduleOwner) -> Ulid {
    match owner {
        ScheduleOwner::Business(id) | ScheduleOwner::Collaborator(id) => id,
    }
}
