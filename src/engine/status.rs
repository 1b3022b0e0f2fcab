use crate::error::AppError;
use crate::models::courier::CourierStatus;

/// Legal courier status transitions:
///
/// ```text
/// FREE -> BUSY     assignment claimed
/// BUSY -> FREE     delivery completed or assignment released
/// FREE -> OFFLINE  courier goes off shift
/// OFFLINE -> FREE  courier logs back in
/// ```
///
/// BUSY -> OFFLINE is refused: the active delivery has to be released first.
pub fn is_legal(from: CourierStatus, to: CourierStatus) -> bool {
    use CourierStatus::*;

    matches!(
        (from, to),
        (Free, Busy) | (Busy, Free) | (Free, Offline) | (Offline, Free)
    )
}

pub fn check_transition(from: CourierStatus, to: CourierStatus) -> Result<(), AppError> {
    if is_legal(from, to) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition { from, to })
    }
}

/// Transitions a courier may request for itself. BUSY is only ever entered
/// through a coordinator claim.
pub fn check_self_report(from: CourierStatus, to: CourierStatus) -> Result<(), AppError> {
    if to == CourierStatus::Busy {
        return Err(AppError::InvalidTransition { from, to });
    }
    check_transition(from, to)
}

#[cfg(test)]
mod tests {
    use super::{check_self_report, check_transition, is_legal};
    use crate::error::AppError;
    use crate::models::courier::CourierStatus::{self, Busy, Free, Offline};

    const ALL: [CourierStatus; 3] = [Free, Busy, Offline];

    #[test]
    fn only_four_transitions_are_legal() {
        let legal: Vec<_> = ALL
            .into_iter()
            .flat_map(|from| ALL.into_iter().map(move |to| (from, to)))
            .filter(|(from, to)| is_legal(*from, *to))
            .collect();

        assert_eq!(
            legal,
            vec![(Free, Busy), (Free, Offline), (Busy, Free), (Offline, Free)]
        );
    }

    #[test]
    fn busy_to_offline_is_invalid() {
        let err = check_transition(Busy, Offline).unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: Busy,
                to: Offline
            }
        ));
    }

    #[test]
    fn self_transitions_are_invalid() {
        for status in ALL {
            assert!(check_transition(status, status).is_err());
        }
    }

    #[test]
    fn courier_cannot_report_itself_busy() {
        assert!(check_transition(Free, Busy).is_ok());
        assert!(check_self_report(Free, Busy).is_err());
        assert!(check_self_report(Busy, Free).is_ok());
        assert!(check_self_report(Offline, Free).is_ok());
    }
}
