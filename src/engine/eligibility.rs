use std::collections::BTreeSet;

use ulid::Ulid;

use crate::model::CollaboratorChoice;

use super::{BusinessState, EngineError};

/// Active collaborators linked to the service, ascending by id.
/// Empty when nobody is linked; there is no fallback to the whole staff.
pub fn eligible_collaborators(bs: &BusinessState, service_id: Ulid) -> Result<BTreeSet<Ulid>, EngineError> {
    match bs.services.get(&service_id) {
        Some(s) if s.active && s.business_id == bs.business.id => {}
        _ => return Err(EngineError::InvalidService(service_id)),
    }
    let linked = bs.links.get(&service_id);
    Ok(linked
        .into_iter()
        .flatten()
        .filter(|id| bs.collaborators.get(id).is_some_and(|c| c.active))
        .copied()
        .collect())
}

/// Collaborators a request may be served by, ascending by id.
pub fn candidates_for(
    bs: &BusinessState,
    service_id: Ulid,
    choice: CollaboratorChoice,
) -> Result<Vec<Ulid>, EngineError> {
    let eligible = eligible_collaborators(bs, service_id)?;
    let not_eligible = EngineError::CollaboratorNotEligible { service: service_id };
    match choice {
        _ if eligible.is_empty() => Err(not_eligible),
        CollaboratorChoice::Specific(id) if eligible.contains(&id) => Ok(vec![id]),
        CollaboratorChoice::Specific(_) => Err(not_eligible),
        CollaboratorChoice::Any => Ok(eligible.into_iter().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::collections::BTreeMap;

    fn state() -> (BusinessState, Ulid, [Ulid; 3]) {
        let business = Business {
            id: Ulid::new(),
            slug: "salao".into(),
            name: "Salão".into(),
            schedule: WeeklySchedule::default(),
            overrides: OverrideMap::new(),
            policy: BookingPolicy::default(),
            active: true,
        };
        let mut bs = BusinessState::new(business);
        let service = Ulid::new();
        bs.services.insert(
            service,
            Service {
                id: service,
                business_id: bs.business.id,
                name: "Corte".into(),
                duration_minutes: 30,
                price_cents: 4500,
                active: true,
            },
        );
        let ids = [Ulid::from_parts(1, 3), Ulid::from_parts(1, 1), Ulid::from_parts(1, 2)];
        for id in ids {
            bs.collaborators.insert(
                id,
                Collaborator {
                    id,
                    business_id: bs.business.id,
                    name: "Staff".into(),
                    active: true,
                    schedule: None,
                    overrides: BTreeMap::new(),
                },
            );
        }
        (bs, service, ids)
    }

    #[test]
    fn linked_active_collaborators_in_id_order() {
        let (mut bs, service, ids) = state();
        bs.links.entry(service).or_default().extend(ids);
        bs.collaborators.get_mut(&ids[2]).unwrap().active = false;

        let eligible: Vec<Ulid> = eligible_collaborators(&bs, service).unwrap().into_iter().collect();
        assert_eq!(eligible, vec![ids[1], ids[0]]);
    }

    #[test]
    fn zero_links_is_unbookable() {
        let (bs, service, ids) = state();
        assert!(eligible_collaborators(&bs, service).unwrap().is_empty());
        assert_eq!(
            candidates_for(&bs, service, CollaboratorChoice::Any),
            Err(EngineError::CollaboratorNotEligible { service })
        );
        assert_eq!(
            candidates_for(&bs, service, CollaboratorChoice::Specific(ids[0])),
            Err(EngineError::CollaboratorNotEligible { service })
        );
    }

    #[test]
    fn specific_must_be_linked() {
        let (mut bs, service, ids) = state();
        bs.links.entry(service).or_default().insert(ids[0]);
        assert_eq!(
            candidates_for(&bs, service, CollaboratorChoice::Specific(ids[0])),
            Ok(vec![ids[0]])
        );
        assert!(matches!(
            candidates_for(&bs, service, CollaboratorChoice::Specific(ids[1])),
            Err(EngineError::CollaboratorNotEligible { .. })
        ));
    }

    #[test]
    fn inactive_or_unknown_service_is_invalid() {
        let (mut bs, service, _) = state();
        let unknown = Ulid::new();
        assert_eq!(
            eligible_collaborators(&bs, unknown),
            Err(EngineError::InvalidService(unknown))
        );
        bs.services.get_mut(&service).unwrap().active = false;
        assert_eq!(
            eligible_collaborators(&bs, service),
            Err(EngineError::InvalidService(service))
        );
    }
}
