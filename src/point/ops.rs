use std::ops::{Add, Div, Mul, Sub};

use super::{Op, Operand, PointInTime};

macro_rules! point_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<f64> for &PointInTime {
            type Output = PointInTime;

            fn $method(self, rhs: f64) -> PointInTime {
                self.combine($op, Operand::Point(self.id), Operand::Scalar(rhs), None)
            }
        }

        impl $trait<f64> for PointInTime {
            type Output = PointInTime;

            fn $method(self, rhs: f64) -> PointInTime {
                (&self).$method(rhs)
            }
        }

        impl $trait<&PointInTime> for f64 {
            type Output = PointInTime;

            fn $method(self, rhs: &PointInTime) -> PointInTime {
                rhs.combine($op, Operand::Scalar(self), Operand::Point(rhs.id), None)
            }
        }

        impl $trait<PointInTime> for f64 {
            type Output = PointInTime;

            fn $method(self, rhs: PointInTime) -> PointInTime {
                self.$method(&rhs)
            }
        }

        impl $trait<&PointInTime> for &PointInTime {
            type Output = PointInTime;

            fn $method(self, rhs: &PointInTime) -> PointInTime {
                self.combine($op, Operand::Point(self.id), Operand::Point(rhs.id), Some(rhs))
            }
        }

        impl $trait<PointInTime> for PointInTime {
            type Output = PointInTime;

            fn $method(self, rhs: PointInTime) -> PointInTime {
                (&self).$method(&rhs)
            }
        }
    };
}

point_op!(Add, add, Op::Add);
point_op!(Sub, sub, Op::Sub);
point_op!(Mul, mul, Op::Mul);
point_op!(Div, div, Op::Div);
