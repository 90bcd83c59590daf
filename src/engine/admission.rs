use std::time::Instant;

use dashmap::DashSet;
use tokio::sync::OwnedRwLockWriteGuard;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::{is_free, window_check};
use super::eligibility::candidates_for;
use super::schedule::resolve;
use super::slots::generate_slots;
use super::{AppointmentBook, Engine, EngineError};

impl Engine {
    /// Admit a booking, or explain why not. Nothing is written on error.
    ///
    /// Validation runs before any book lock is taken. The candidate books are
    /// then write-locked in ascending collaborator order, the window and the
    /// conflict check are repeated against the clock at commit time, and the
    /// event is journaled and applied while the locks are still held.
    pub async fn admit(&self, id: Ulid, request: BookingRequest) -> Result<Appointment, EngineError> {
        let business_id = request.business_id;
        let choice = request.collaborator;
        let result = self.admit_inner(id, request).await;

        let outcome = match &result {
            Ok(_) => "admitted",
            Err(e) => e.outcome_label(),
        };
        metrics::counter!(observability::ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
        match &result {
            Ok(appt) => tracing::info!(
                appointment = %appt.id,
                business = %business_id,
                collaborator = %appt.collaborator_id,
                requested = %choice,
                date = %appt.date,
                span = %appt.span,
                "appointment admitted"
            ),
            Err(e) => tracing::debug!(business = %business_id, requested = %choice, outcome, "admission refused: {e}"),
        }
        result
    }

    async fn admit_inner(&self, id: Ulid, req: BookingRequest) -> Result<Appointment, EngineError> {
        check_request_limits(&req)?;
        // Claim first, then look at the index: a finished admission is in
        // `appointments` before its claim is released.
        let _claim = IdClaim::take(&self.admitting, id)?;
        if self.appointments.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let _gate = self.commit_gate.read().await;
        let bs_lock = self.business_or_not_found(&req.business_id)?;
        let bs = bs_lock.read().await;
        if !bs.business.active {
            return Err(EngineError::BusinessDisabled(req.business_id));
        }

        let candidates = candidates_for(&bs, req.service_id, req.collaborator)?;
        let service = bs
            .services
            .get(&req.service_id)
            .ok_or(EngineError::InvalidService(req.service_id))?;
        if let ClientRef::Registered(client_id) = req.client {
            let owner = self
                .clients
                .get(&client_id)
                .map(|c| c.business_id)
                .ok_or(EngineError::NotFound(client_id))?;
            if owner != req.business_id {
                return Err(EngineError::CrossTenant(client_id, req.business_id));
            }
        }

        let policy = bs.business.policy;
        window_check(req.date, req.start, self.clock.now(), &policy)?;

        let duration = service.duration_minutes;
        let days: Vec<(Ulid, DaySchedule)> = candidates
            .iter()
            .map(|c| (*c, resolve(&bs.business, bs.collaborators.get(c), req.date).day))
            .collect();
        if days.iter().all(|(_, day)| !day.active) {
            return Err(EngineError::DayClosed(req.date));
        }
        let on_grid: Vec<Ulid> = days
            .iter()
            .filter(|(_, day)| generate_slots(day, duration, policy.buffer_minutes).any(|s| s.start == req.start))
            .map(|(c, _)| *c)
            .collect();
        if on_grid.is_empty() {
            return Err(EngineError::OffSchedule {
                date: req.date,
                start: req.start,
            });
        }

        let waited = Instant::now();
        let mut books = tokio::time::timeout(self.admission_timeout, self.lock_books(&on_grid))
            .await
            .map_err(|_| EngineError::Timeout)??;
        metrics::histogram!(observability::ADMISSION_LOCK_WAIT_SECONDS).record(waited.elapsed().as_secs_f64());

        // The clock may have moved while we waited.
        window_check(req.date, req.start, self.clock.now(), &policy)?;

        let span = Span::new(req.start, req.start + duration);
        let chosen = books
            .iter()
            .enumerate()
            .filter(|(_, book)| book.on(req.date).len() < MAX_APPOINTMENTS_PER_DAY)
            .filter(|(_, book)| is_free(&span, book.on(req.date), policy.buffer_minutes))
            .min_by_key(|(_, book)| book.count_blocking(req.date))
            .map(|(idx, _)| idx)
            .ok_or(EngineError::SlotConflict)?;

        let appointment = Appointment {
            id,
            business_id: req.business_id,
            service_id: req.service_id,
            collaborator_id: books[chosen].collaborator_id,
            client: req.client,
            date: req.date,
            span,
            status: AppointmentStatus::Scheduled,
            price_cents: service.price_cents,
            notes: req.notes,
        };
        let event = Event::AppointmentAdmitted {
            appointment: appointment.clone(),
        };
        self.persist_to_book(&mut books[chosen], &event).await?;

        drop(books);
        drop(bs);
        self.notify.send(appointment.business_id, &event);
        Ok(appointment)
    }

    /// Write-lock books in the given (ascending) order.
    async fn lock_books(&self, collaborators: &[Ulid]) -> Result<Vec<OwnedRwLockWriteGuard<AppointmentBook>>, EngineError> {
        let mut guards = Vec::with_capacity(collaborators.len());
        for id in collaborators {
            let book = self.get_book(id).ok_or(EngineError::NotFound(*id))?;
            guards.push(book.write_owned().await);
        }
        Ok(guards)
    }
}

/// Exclusive hold on an appointment id for the length of one admission.
struct IdClaim<'a> {
    admitting: &'a DashSet<Ulid>,
    id: Ulid,
}

impl<'a> IdClaim<'a> {
    fn take(admitting: &'a DashSet<Ulid>, id: Ulid) -> Result<Self, EngineError> {
        if !admitting.insert(id) {
            return Err(EngineError::AlreadyExists(id));
        }
        Ok(Self { admitting, id })
    }
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        self.admitting.remove(&self.id);
    }
}

fn check_request_limits(req: &BookingRequest) -> Result<(), EngineError> {
    if req.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    if let ClientRef::Guest { name, contact } = &req.client {
        if name.trim().is_empty() || name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("guest name must be 1 to 200 characters"));
        }
        if contact.as_ref().is_some_and(|c| c.len() > MAX_CONTACT_LEN) {
            return Err(EngineError::LimitExceeded("guest contact too long"));
        }
    }
    Ok(())
}
