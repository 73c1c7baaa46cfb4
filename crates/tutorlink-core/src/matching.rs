//! Demand-request matching.
//!
//! Pure predicate logic: given a demand request, the full teacher map and
//! the lesson list, compute which teachers are eligible to receive it.
//! Delivery (live vs. pending queue) is the broadcast layer's concern.

use std::collections::{HashMap, HashSet};
use tracing::trace;
use tutorlink_protocol::{DemandRequest, Lesson, LessonFormat, LessonStatus, TeacherProfile};

/// Whether one teacher matches a demand request.
///
/// All criteria are AND-combined, cheapest first. Unset request fields do
/// not constrain the match.
#[must_use]
pub fn teacher_matches(
    request: &DemandRequest,
    teacher: &TeacherProfile,
    lessons: &[Lesson],
) -> bool {
    // A student cannot match their own request, even if also a teacher.
    if teacher.id == request.student_id {
        return false;
    }

    if !teacher.accepts_demand {
        return false;
    }

    if let Some(subject) = &request.subject {
        if !teacher.subjects.contains(subject) {
            return false;
        }
    }

    if let Some(level) = &request.experience_level {
        if teacher.experience_level.as_ref() != Some(level) {
            return false;
        }
    }

    if let Some(format) = request.format {
        if !teacher.formats.contains(&format) {
            return false;
        }
        // In-person lessons additionally require a city match when the
        // request names one.
        if format == LessonFormat::InPerson {
            if let Some(city) = &request.city {
                if teacher.city.as_ref() != Some(city) {
                    return false;
                }
            }
        }
    }

    if let Some(duration) = request.duration_minutes {
        if !teacher.durations.contains(&duration) {
            return false;
        }
    }

    if let Some(grade) = &request.grade {
        if !teacher.grades.contains(grade) {
            return false;
        }
    }

    if !request.goals.is_empty() && !request.goals.iter().any(|g| teacher.goals.contains(g)) {
        return false;
    }

    if has_conflict(&teacher.id, request, lessons) {
        return false;
    }

    true
}

/// The set of teacher ids eligible for a demand request.
///
/// Order is immaterial; the broadcast layer decides delivery order.
#[must_use]
pub fn matching_teachers(
    request: &DemandRequest,
    teachers: &HashMap<String, TeacherProfile>,
    lessons: &[Lesson],
) -> HashSet<String> {
    let matched: HashSet<String> = teachers
        .values()
        .filter(|teacher| teacher_matches(request, teacher, lessons))
        .map(|teacher| teacher.id.clone())
        .collect();
    trace!(request = %request.id, matched = matched.len(), "Matched demand request");
    matched
}

/// A teacher already holding a non-cancelled lesson at the request's exact
/// date and start time is excluded.
fn has_conflict(teacher_id: &str, request: &DemandRequest, lessons: &[Lesson]) -> bool {
    let (Some(date), Some(start_time)) = (request.date, request.start_time) else {
        return false;
    };

    lessons.iter().any(|lesson| {
        lesson.teacher_id == teacher_id
            && lesson.status != LessonStatus::Cancelled
            && lesson.date == Some(date)
            && lesson.start_time == Some(start_time)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutorlink_protocol::DemandStatus;

    fn teacher(id: &str) -> TeacherProfile {
        TeacherProfile {
            id: id.into(),
            name: id.into(),
            subjects: vec!["Math".into(), "Physics".into()],
            formats: vec![LessonFormat::Remote, LessonFormat::InPerson],
            durations: vec![45, 60],
            city: Some("Berlin".into()),
            accepts_demand: true,
            experience_level: Some("senior".into()),
            grades: vec!["10".into(), "11".into()],
            goals: vec!["exam_prep".into(), "homework".into()],
            ..TeacherProfile::default()
        }
    }

    fn request() -> DemandRequest {
        DemandRequest {
            id: "demand_1".into(),
            student_id: "s1".into(),
            subject: Some("Math".into()),
            status: DemandStatus::Pending,
            ..DemandRequest::default()
        }
    }

    #[test]
    fn test_unconstrained_fields_do_not_filter() {
        assert!(teacher_matches(&request(), &teacher("t1"), &[]));
    }

    #[test]
    fn test_excludes_requester_even_if_also_teacher() {
        let mut req = request();
        req.student_id = "t1".into();
        assert!(!teacher_matches(&req, &teacher("t1"), &[]));
    }

    #[test]
    fn test_excludes_teacher_not_accepting_demand() {
        let mut t = teacher("t1");
        t.accepts_demand = false;
        assert!(!teacher_matches(&request(), &t, &[]));
    }

    #[test]
    fn test_subject_must_be_offered() {
        let mut req = request();
        req.subject = Some("Chemistry".into());
        assert!(!teacher_matches(&req, &teacher("t1"), &[]));
    }

    #[test]
    fn test_experience_level_is_exact() {
        let mut req = request();
        req.experience_level = Some("junior".into());
        assert!(!teacher_matches(&req, &teacher("t1"), &[]));

        req.experience_level = Some("senior".into());
        assert!(teacher_matches(&req, &teacher("t1"), &[]));
    }

    #[test]
    fn test_in_person_requires_city_match() {
        let mut req = request();
        req.format = Some(LessonFormat::InPerson);
        req.city = Some("Hamburg".into());
        assert!(!teacher_matches(&req, &teacher("t1"), &[]));

        req.city = Some("Berlin".into());
        assert!(teacher_matches(&req, &teacher("t1"), &[]));

        // Remote format ignores the city entirely.
        req.format = Some(LessonFormat::Remote);
        req.city = Some("Hamburg".into());
        assert!(teacher_matches(&req, &teacher("t1"), &[]));
    }

    #[test]
    fn test_duration_and_grade_membership() {
        let mut req = request();
        req.duration_minutes = Some(90);
        assert!(!teacher_matches(&req, &teacher("t1"), &[]));
        req.duration_minutes = Some(60);
        assert!(teacher_matches(&req, &teacher("t1"), &[]));

        req.grade = Some("7".into());
        assert!(!teacher_matches(&req, &teacher("t1"), &[]));
        req.grade = Some("11".into());
        assert!(teacher_matches(&req, &teacher("t1"), &[]));
    }

    #[test]
    fn test_goals_require_intersection() {
        let mut req = request();
        req.goals = vec!["competition".into()];
        assert!(!teacher_matches(&req, &teacher("t1"), &[]));

        req.goals = vec!["competition".into(), "homework".into()];
        assert!(teacher_matches(&req, &teacher("t1"), &[]));
    }

    #[test]
    fn test_scheduling_conflict_excludes_teacher() {
        let mut req = request();
        req.date = Some("2025-01-15".parse().unwrap());
        req.start_time = Some("10:00:00".parse().unwrap());

        let lesson = Lesson {
            id: "lesson_1".into(),
            teacher_id: "t1".into(),
            date: req.date,
            start_time: req.start_time,
            status: LessonStatus::Scheduled,
            ..Lesson::default()
        };
        assert!(!teacher_matches(&req, &teacher("t1"), &[lesson.clone()]));

        // A cancelled lesson at the same time is not a conflict.
        let mut cancelled = lesson.clone();
        cancelled.status = LessonStatus::Cancelled;
        assert!(teacher_matches(&req, &teacher("t1"), &[cancelled]));

        // A lesson at a different start time is not a conflict.
        let mut other_time = lesson;
        other_time.start_time = Some("11:00:00".parse().unwrap());
        assert!(teacher_matches(&req, &teacher("t1"), &[other_time]));
    }

    #[test]
    fn test_matching_teachers_returns_surviving_set() {
        let mut teachers = HashMap::new();
        teachers.insert("t1".to_string(), teacher("t1"));
        let mut declined = teacher("t2");
        declined.accepts_demand = false;
        teachers.insert("t2".to_string(), declined);
        teachers.insert("t3".to_string(), teacher("t3"));

        let matched = matching_teachers(&request(), &teachers, &[]);
        assert_eq!(matched.len(), 2);
        assert!(matched.contains("t1"));
        assert!(matched.contains("t3"));
        assert!(!matched.contains("t2"));
    }
}
